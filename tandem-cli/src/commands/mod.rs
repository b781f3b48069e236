pub mod capture;
pub mod checklist;
pub mod daemon;
pub mod status;
pub mod sync;
pub mod write;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use tandem_core::types::{Attributes, Key};
use tandem_sync::Workspace;

/// `<table> <id>` positional pair shared by several commands.
#[derive(Args, Debug, Clone)]
pub struct KeyArgs {
    /// Table name.
    pub table: String,

    /// Record id.
    pub id: i64,
}

impl KeyArgs {
    pub fn key(&self) -> Key {
        Key::new(self.table.as_str(), self.id)
    }
}

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

pub(crate) fn open_workspace(home: &Path) -> Result<Workspace> {
    Workspace::open_at(home).context("failed to open workspace (check ~/.tandem/config.yaml)")
}

/// Parse a JSON object of column values; `None` yields an empty row.
pub(crate) fn parse_attrs(raw: Option<&str>) -> Result<Attributes> {
    let Some(raw) = raw else {
        return Ok(Attributes::new());
    };
    serde_json::from_str(raw).with_context(|| format!("--attrs must be a JSON object, got '{raw}'"))
}
