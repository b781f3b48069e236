//! `tandem checklist`: everything that must travel with a record.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use tandem_core::types::LogEntry;
use tandem_sync::Checklist;

use super::{home_dir, open_workspace, KeyArgs};

#[derive(Args, Debug)]
pub struct ChecklistArgs {
    #[command(flatten)]
    pub key: KeyArgs,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,

    /// Apply the checklist to production.
    #[arg(long)]
    pub sync: bool,

    /// Accept entries that require confirmation when syncing.
    #[arg(long, requires = "sync")]
    pub confirm: bool,
}

#[derive(Serialize)]
struct ChecklistJson<'a> {
    subject: String,
    creations: &'a [LogEntry],
    updates: &'a [LogEntry],
    deletions: &'a [LogEntry],
    requires_confirmation: &'a [LogEntry],
    affected_entries: usize,
}

#[derive(Tabled)]
struct ChecklistRow {
    #[tabled(rename = "entry")]
    entry: u64,
    #[tabled(rename = "action")]
    action: &'static str,
    #[tabled(rename = "key")]
    key: String,
    #[tabled(rename = "commit")]
    commit: String,
    #[tabled(rename = "confirm")]
    confirm: &'static str,
}

impl ChecklistArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let workspace = open_workspace(&home)?;
        let synchronizer = workspace.synchronizer();
        let subject = self.key.key();

        let checklist = synchronizer
            .checklist(Checklist::for_records([subject.clone()]))
            .with_context(|| format!("failed to build checklist for {subject}"))?;

        if self.json {
            let report = ChecklistJson {
                subject: subject.to_string(),
                creations: checklist.creations(),
                updates: checklist.updates(),
                deletions: checklist.deletions(),
                requires_confirmation: checklist.requires_confirmation(),
                affected_entries: checklist.affected_entries().count(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_table(&subject.to_string(), &checklist);
        }

        if !self.sync {
            return Ok(());
        }
        if checklist.is_confirmation_required() && !self.confirm {
            bail!(
                "{} entries pulled in through other records need confirmation; rerun with --confirm",
                checklist.requires_confirmation().len()
            );
        }
        let applied = synchronizer
            .sync_checklist(&checklist)
            .with_context(|| format!("checklist sync failed for {subject}"))?;
        workspace
            .save_at(&home)
            .context("failed to save workspace")?;
        println!("✓ synced {subject} ({applied} entries applied)");
        Ok(())
    }
}

fn print_table(subject: &str, checklist: &Checklist) {
    let buckets: [(&'static str, &[LogEntry]); 3] = [
        ("create", checklist.creations()),
        ("update", checklist.updates()),
        ("delete", checklist.deletions()),
    ];
    let needs_confirm = |entry: &LogEntry| {
        checklist
            .requires_confirmation()
            .iter()
            .any(|c| c.key == entry.key)
    };

    let mut rows: Vec<ChecklistRow> = buckets
        .iter()
        .flat_map(|(action, entries)| {
            entries.iter().map(move |entry| (*action, entry))
        })
        .map(|(action, entry)| ChecklistRow {
            entry: entry.id.0,
            action,
            key: entry
                .key
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
            commit: entry
                .commit_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            confirm: if needs_confirm(entry) { "yes" } else { "" },
        })
        .collect();
    rows.sort_by_key(|r| r.entry);

    if rows.is_empty() {
        println!("✓ {subject}: nothing pending");
        return;
    }

    println!("{}", format!("checklist for {subject}").bold());
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    if checklist.is_confirmation_required() {
        println!(
            "{}",
            format!(
                "{} entries require confirmation",
                checklist.requires_confirmation().len()
            )
            .yellow()
        );
    }
}
