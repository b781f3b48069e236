//! `tandem status`: pending log entries and commit state.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use tandem_core::types::{LogEntry, Operation};
use tandem_daemon::read_status;

use super::{home_dir, open_workspace};

/// Arguments for `tandem status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Default, Clone, Serialize, Tabled)]
struct TableStatus {
    #[tabled(rename = "table")]
    table: String,
    #[tabled(rename = "pending")]
    pending: usize,
    #[tabled(rename = "inserts")]
    inserts: usize,
    #[tabled(rename = "updates")]
    updates: usize,
    #[tabled(rename = "deletes")]
    deletes: usize,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    pending_entries: usize,
    open_commits: usize,
    closed_commits: usize,
    production_rows: usize,
    tables: Vec<TableStatus>,
    last_autosync_stopped_at: Option<String>,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let workspace = open_workspace(&home)?;
        let entries = workspace.staging.entries();
        let open_commits = workspace.staging.with_log(|log| log.open_starts().count());
        let daemon = read_status(&home).context("failed to read autosync status")?;

        let report = StatusReport {
            pending_entries: entries.iter().filter(|e| e.is_content()).count(),
            open_commits,
            closed_commits: entries
                .iter()
                .filter(|e| e.operation == Operation::CommitEnd)
                .count(),
            production_rows: workspace.production.len(),
            tables: per_table(&entries),
            last_autosync_stopped_at: daemon.and_then(|s| {
                chrono::DateTime::from_timestamp(s.stopped_at_unix as i64, 0)
                    .map(|t| t.to_rfc3339())
            }),
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }
        print_report(&report);
        Ok(())
    }
}

fn per_table(entries: &[LogEntry]) -> Vec<TableStatus> {
    let mut tables: BTreeMap<String, TableStatus> = BTreeMap::new();
    for entry in entries {
        let Some(key) = &entry.key else { continue };
        let status = tables.entry(key.table.0.clone()).or_insert_with(|| TableStatus {
            table: key.table.0.clone(),
            ..TableStatus::default()
        });
        status.pending += 1;
        match entry.operation {
            Operation::Insert => status.inserts += 1,
            Operation::Update => status.updates += 1,
            Operation::Delete => status.deletes += 1,
            Operation::CommitStart | Operation::CommitEnd => {}
        }
    }
    tables.into_values().collect()
}

fn print_report(report: &StatusReport) {
    if report.pending_entries == 0 {
        println!("{}", "✓ production is in sync".green());
    } else {
        println!(
            "{}",
            format!("{} log entries pending", report.pending_entries).yellow()
        );
        let mut table = Table::new(report.tables.clone());
        table.with(Style::rounded());
        println!("{table}");
    }

    println!(
        "commits: {} closed, {} open · production rows: {}",
        report.closed_commits, report.open_commits, report.production_rows
    );
    if let Some(at) = &report.last_autosync_stopped_at {
        println!("last autosync run stopped at {at}");
    }
}
