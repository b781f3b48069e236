//! # tandem-sync
//!
//! Change capture on a staging store and reconciliation into production.
//!
//! Writes go through a [`Session`] on [`Staging`]; captured commits group a
//! session's writes. A [`Checklist`] gathers everything that must travel
//! with a subject, and the [`Synchronizer`] applies entries to a
//! [`RowStore`] either per checklist or by draining the log.

pub mod checklist;
pub mod commit;
pub mod error;
pub mod hooks;
pub mod log;
pub mod pipeline;
pub mod staging;
pub mod store;
pub mod synchronizer;
pub mod workspace;

pub use checklist::{Checklist, ChecklistBuilder, EntrySet};
pub use commit::{Capture, Commit};
pub use error::{StoreError, SyncError};
pub use hooks::{HookChain, HookFlow, SyncHook, SyncRole, SyncedEntry};
pub use log::ChangeLog;
pub use staging::{ChangeCapture, Session, Staging, Unit};
pub use store::{MemoryStore, RowStore};
pub use synchronizer::Synchronizer;
pub use workspace::Workspace;
