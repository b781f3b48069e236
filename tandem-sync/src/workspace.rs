//! Workspace: staging and production persisted between CLI invocations.
//!
//! Persists a [`Snapshot`] JSON document at `<home>/.tandem/state.json`.
//! Writes use the same atomic `.tmp` + rename pattern as the config.
//!
//! A workspace opened with [`Workspace::open_at`] holds an exclusive lock on
//! `<home>/.tandem/state.lock` until it is dropped, so a CLI write and a
//! daemon pass never load the same snapshot and overwrite each other.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};

use tandem_core::config::{self, SyncConfig};
use tandem_core::types::{Attributes, Key, LogEntry};

use crate::error::{io_err, SyncError};
use crate::log::ChangeLog;
use crate::staging::{Staging, StagingState};
use crate::store::{MemoryStore, RowStore};
use crate::synchronizer::Synchronizer;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub key: Key,
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagingSnapshot {
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(default)]
    pub entries: Vec<LogEntry>,
    #[serde(default)]
    pub last_entry_id: u64,
    #[serde(default)]
    pub last_session: u64,
    #[serde(default)]
    pub migrations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductionSnapshot {
    #[serde(default)]
    pub rows: Vec<Row>,
    #[serde(default)]
    pub migrations: Vec<String>,
}

/// On-disk workspace payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub staging: StagingSnapshot,
    #[serde(default)]
    pub production: ProductionSnapshot,
}

/// `<home>/.tandem/state.json`
pub fn state_path_at(home: &Path) -> PathBuf {
    config::tandem_dir_at(home).join("state.json")
}

/// `<home>/.tandem/state.lock`
pub fn lock_path_at(home: &Path) -> PathBuf {
    config::tandem_dir_at(home).join("state.lock")
}

/// Exclusive hold on the workspace lock file. Released when dropped.
#[derive(Debug)]
pub struct WorkspaceLock {
    _file: File,
}

impl WorkspaceLock {
    /// Block until no other process or workspace holds the lock.
    pub fn acquire_at(home: &Path) -> Result<Self, SyncError> {
        let path = lock_path_at(home);
        let dir = config::tandem_dir_at(home);
        std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| io_err(&path, e))?;
        file.lock_exclusive().map_err(|e| io_err(&path, e))?;
        tracing::debug!("acquired workspace lock {}", path.display());
        Ok(Self { _file: file })
    }
}

/// Load the snapshot, or `None` if no workspace has been saved yet.
pub fn load_snapshot_at(home: &Path) -> Result<Option<Snapshot>, SyncError> {
    let path = state_path_at(home);
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(Some(serde_json::from_str(&contents)?))
}

/// Save the snapshot atomically.
///
/// Writes to `<path>.tmp` then renames to `<path>`.
pub fn save_snapshot_at(home: &Path, snapshot: &Snapshot) -> Result<(), SyncError> {
    let path = state_path_at(home);
    let Some(dir) = path.parent() else {
        return Err(io_err(
            path,
            std::io::Error::other("invalid workspace state path"),
        ));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(snapshot)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

fn rows(rows: Vec<Row>) -> impl Iterator<Item = (Key, Attributes)> {
    rows.into_iter().map(|r| (r.key, r.attributes))
}

fn to_rows(rows: impl IntoIterator<Item = (Key, Attributes)>) -> Vec<Row> {
    rows.into_iter()
        .map(|(key, attributes)| Row { key, attributes })
        .collect()
}

/// Loaded stores plus the config they were opened with.
#[derive(Debug)]
pub struct Workspace {
    pub config: SyncConfig,
    pub staging: Arc<Staging>,
    pub production: Arc<MemoryStore>,
    lock: Option<WorkspaceLock>,
}

impl Workspace {
    pub fn new(config: SyncConfig) -> Self {
        Self::from_snapshot(config, None)
    }

    /// Open the workspace under `home`, starting empty if none was saved.
    ///
    /// Blocks while another workspace for `home` is open. The lock is held
    /// until the returned workspace is dropped.
    pub fn open_at(home: &Path) -> Result<Self, SyncError> {
        let lock = WorkspaceLock::acquire_at(home)?;
        let config = config::load_at(home)?;
        let snapshot = load_snapshot_at(home)?;
        let mut workspace = Self::from_snapshot(config, snapshot);
        workspace.lock = Some(lock);
        Ok(workspace)
    }

    pub fn from_snapshot(config: SyncConfig, snapshot: Option<Snapshot>) -> Self {
        let (staging, production) = snapshot
            .map(|s| (s.staging, s.production))
            .unwrap_or_default();

        let state = StagingState {
            rows: rows(staging.rows).collect(),
            log: ChangeLog::from_entries(staging.entries, staging.last_entry_id),
            last_session: staging.last_session,
            migrations: staging.migrations,
        };
        let production = MemoryStore::from_rows(production.migrations, rows(production.rows));

        Self {
            staging: Arc::new(Staging::from_state(state, &config)),
            production: Arc::new(production),
            config,
            lock: None,
        }
    }

    pub fn snapshot(&self) -> Result<Snapshot, SyncError> {
        let state = self.staging.snapshot_state();
        let production_migrations = self.production.migrations()?;
        Ok(Snapshot {
            saved_at: Utc::now(),
            staging: StagingSnapshot {
                rows: to_rows(state.rows),
                entries: state.log.iter().cloned().collect(),
                last_entry_id: state.log.last_assigned(),
                last_session: state.last_session,
                migrations: state.migrations,
            },
            production: ProductionSnapshot {
                rows: to_rows(self.production.rows()),
                migrations: production_migrations,
            },
        })
    }

    /// Save under `home`. A workspace built in memory takes the lock for
    /// the duration of the write.
    pub fn save_at(&self, home: &Path) -> Result<(), SyncError> {
        let _guard = match self.lock {
            Some(_) => None,
            None => Some(WorkspaceLock::acquire_at(home)?),
        };
        save_snapshot_at(home, &self.snapshot()?)
    }

    pub fn synchronizer(&self) -> Synchronizer {
        Synchronizer::new(
            self.staging.clone(),
            self.production.clone(),
            self.config.clone(),
        )
    }
}
