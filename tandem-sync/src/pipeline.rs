//! Shared sync pipeline entrypoint used by CLI and daemon.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{SyncError, Workspace};

/// Scope for a sync pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncScope {
    /// One drain pass; `None` uses the configured batch size.
    Batched { limit: Option<usize> },
    /// Drain the whole log ignoring eligibility.
    All,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub applied: usize,
    /// Log entries still pending after the pass.
    pub remaining: usize,
    pub finished_at: DateTime<Utc>,
}

impl PassReport {
    pub fn new(applied: usize, remaining: usize) -> Self {
        Self {
            applied,
            remaining,
            finished_at: Utc::now(),
        }
    }
}

/// Open the workspace under `home`, run one sync for `scope`, and save.
///
/// Nothing is saved when the sync fails, so the persisted log is left as it
/// was before the run.
pub fn run(home: &Path, scope: SyncScope) -> Result<PassReport, SyncError> {
    let workspace = Workspace::open_at(home)?;
    let synchronizer = workspace.synchronizer();
    let applied = match scope {
        SyncScope::Batched { limit } => {
            synchronizer.sync(limit.unwrap_or(workspace.config.batch_size))?
        }
        SyncScope::All => synchronizer.sync_all()?,
    };
    workspace.save_at(home)?;
    Ok(PassReport::new(applied, workspace.staging.log_len()))
}
