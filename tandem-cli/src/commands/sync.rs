//! `tandem sync`: drain pending log entries into production.

use anyhow::{Context, Result};
use clap::Args;
use tandem_sync::pipeline::{self, SyncScope};

use super::home_dir;

/// Arguments for `tandem sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Entries selected per batch (defaults to `batch_size` in config).
    #[arg(long)]
    pub limit: Option<usize>,

    /// Apply everything in the log, including entries of open commits.
    #[arg(long, conflicts_with = "limit")]
    pub all: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let scope = if self.all {
            SyncScope::All
        } else {
            SyncScope::Batched { limit: self.limit }
        };

        let report = pipeline::run(&home, scope).context("sync failed")?;
        if report.applied == 0 && report.remaining == 0 {
            println!("✓ nothing to sync");
            return Ok(());
        }
        println!(
            "✓ applied {} entries ({} log entries pending)",
            report.applied, report.remaining
        );
        Ok(())
    }
}
