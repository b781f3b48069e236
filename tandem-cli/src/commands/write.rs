//! `tandem write`: a single staging write in its own session.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use super::{home_dir, open_workspace, parse_attrs, KeyArgs};

#[derive(Subcommand, Debug)]
pub enum WriteCommand {
    /// Insert a new row.
    Insert(RowArgs),
    /// Merge columns into an existing row.
    Update(RowArgs),
    /// Delete a row.
    Delete(KeyArgs),
}

#[derive(Args, Debug)]
pub struct RowArgs {
    #[command(flatten)]
    pub key: KeyArgs,

    /// Column values as a JSON object, e.g. '{"title":"hello"}'.
    #[arg(long)]
    pub attrs: Option<String>,
}

pub fn run(command: WriteCommand) -> Result<()> {
    let home = home_dir()?;
    let workspace = open_workspace(&home)?;
    let session = workspace.staging.session();

    let (label, key, logged) = match command {
        WriteCommand::Insert(args) => {
            let key = args.key.key();
            let attrs = parse_attrs(args.attrs.as_deref())?;
            let logged = session
                .insert(&key, attrs)
                .with_context(|| format!("insert failed for {key}"))?;
            ("inserted", key, logged)
        }
        WriteCommand::Update(args) => {
            let key = args.key.key();
            let attrs = parse_attrs(args.attrs.as_deref())?;
            let logged = session
                .update(&key, attrs)
                .with_context(|| format!("update failed for {key}"))?;
            ("updated", key, logged)
        }
        WriteCommand::Delete(args) => {
            let key = args.key();
            let logged = session
                .delete(&key)
                .with_context(|| format!("delete failed for {key}"))?;
            ("deleted", key, logged)
        }
    };

    workspace
        .save_at(&home)
        .context("failed to save workspace")?;

    match logged {
        Some(id) => println!("✓ {label} {key} (log entry {id})"),
        None => println!("✓ {label} {key} (not captured)"),
    }
    Ok(())
}
