//! Autosync daemon: drains the staging log on a polling loop until shutdown.

pub mod autosync;
mod error;
pub mod paths;
mod runtime;

pub use autosync::{auto_sync, AutosyncStats};
pub use error::DaemonError;
pub use runtime::{read_status, run, start_blocking, AutosyncStatus};
