//! Tandem core library: domain types, sync configuration, errors.
//!
//! Public API surface:
//! - [`types`]: keys, log entries and operations
//! - [`error`]: [`ConfigError`]
//! - [`config`]: load / save of `~/.tandem/config.yaml`

pub mod config;
pub mod error;
pub mod types;

pub use config::{Association, SyncConfig, TableSchema};
pub use error::ConfigError;
pub use types::{Attributes, EntryId, Key, LogEntry, Operation, RecordId, SessionId, TableName};
