//! Error types for tandem-sync.

use std::path::PathBuf;

use thiserror::Error;

use tandem_core::error::ConfigError;
use tandem_core::types::{EntryId, Key};

/// Failures reported by a [`RowStore`](crate::store::RowStore) accessor.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached; the same call may succeed later.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// An insert targeted a key that already holds a row.
    #[error("row {key} already exists")]
    Conflict { key: Key },

    /// An update targeted a key with no row.
    #[error("row {key} does not exist")]
    Missing { key: Key },
}

/// All errors that can arise from capture and sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The log does not hold exactly one start and one end marker for the
    /// commit. Indicates log corruption.
    #[error("commit {id} not found: expected exactly one start and one end marker")]
    CommitNotFound { id: EntryId },

    /// The two stores run different migrations; nothing may be applied.
    #[error("schema mismatch: staging at {staging}, production at {production}")]
    SchemaMismatch { staging: String, production: String },

    /// A capture was run without a body.
    #[error("capture requires a body to run inside the commit")]
    SyncBlockRequired,

    /// A transient failure; the autosync loop logs it and keeps going.
    #[error("sync deferred, will not retry this pass: {0}")]
    DoNotRetry(String),

    /// A store accessor rejected the operation.
    #[error("store error: {0}")]
    Store(StoreError),

    /// An error loading the sync configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (workspace snapshot).
    #[error("workspace snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Errors of this class are survivable by the autosync loop.
    pub fn is_do_not_retry(&self) -> bool {
        matches!(self, SyncError::DoNotRetry(_))
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => SyncError::DoNotRetry(reason),
            other => SyncError::Store(other),
        }
    }
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
