//! Tandem: staging to production change reconciliation CLI.
//!
//! # Usage
//!
//! ```text
//! tandem write insert|update <table> <id> [--attrs JSON]
//! tandem write delete <table> <id>
//! tandem capture <script.yaml>
//! tandem checklist <table> <id> [--json] [--sync [--confirm]]
//! tandem sync [--limit N] [--all]
//! tandem status [--json]
//! tandem daemon start [--interval SECS]
//! tandem daemon status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    capture::CaptureArgs, checklist::ChecklistArgs, daemon::DaemonCommand, status::StatusArgs,
    sync::SyncArgs, write::WriteCommand,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "tandem",
    version,
    about = "Capture staging writes and reconcile them into production",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write one row to staging in a fresh session.
    Write {
        #[command(subcommand)]
        command: WriteCommand,
    },

    /// Run a scripted commit from a YAML file.
    Capture(CaptureArgs),

    /// Show (and optionally sync) the checklist for a record.
    Checklist(ChecklistArgs),

    /// Drain pending log entries into production.
    Sync(SyncArgs),

    /// Show pending log entries and open commits.
    Status(StatusArgs),

    /// Run the autosync loop.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Write { command } => commands::write::run(command),
        Commands::Capture(args) => args.run(),
        Commands::Checklist(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
