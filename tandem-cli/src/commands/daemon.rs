//! `tandem daemon`: foreground autosync loop.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use tandem_daemon::{read_status, start_blocking};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the autosync loop in the foreground until ctrl-c.
    Start(StartArgs),
    /// Show counters from the last cleanly stopped run.
    Status,
}

#[derive(Args, Debug)]
pub struct StartArgs {
    /// Seconds between passes (defaults to `polling_delay_secs` in config).
    #[arg(long)]
    pub interval: Option<u64>,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = super::home_dir()?;

    match command {
        DaemonCommand::Start(args) => {
            let stats = start_blocking(&home, args.interval.map(Duration::from_secs))
                .context("autosync exited with error")?;
            println!(
                "✓ autosync stopped after {} passes ({} applied, {} deferred)",
                stats.passes, stats.applied, stats.deferred
            );
        }
        DaemonCommand::Status => match read_status(&home).context("failed to read status")? {
            Some(status) => println!("{}", serde_json::to_string_pretty(&status)?),
            None => println!("autosync has not run yet"),
        },
    }
    Ok(())
}
