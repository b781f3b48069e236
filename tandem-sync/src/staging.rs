//! The staging store: rows, the change log, and the sessions writing to them.
//!
//! Row writes and their log entries happen under one lock, so a write and
//! its captured entry are never observed apart. An atomic [`Unit`] holds the
//! same lock for its whole duration: reads inside it are repeatable, and the
//! log deletions it requests are applied only if it finishes successfully.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::Mutex;

use tandem_core::config::SyncConfig;
use tandem_core::types::{Attributes, EntryId, Key, LogEntry, Operation, SessionId, TableName};

use crate::commit::{Capture, Commit};
use crate::error::{StoreError, SyncError};
use crate::log::ChangeLog;

// ---------------------------------------------------------------------------
// Change capture
// ---------------------------------------------------------------------------

/// Appends one log entry per write to a tracked table.
#[derive(Debug, Clone, Default)]
pub struct ChangeCapture {
    /// `None` tracks every table.
    tracked: Option<BTreeSet<TableName>>,
}

impl ChangeCapture {
    pub fn from_config(config: &SyncConfig) -> Self {
        let tracked = (!config.tables.is_empty())
            .then(|| config.tables.iter().map(|t| t.name.clone()).collect());
        Self { tracked }
    }

    pub fn is_tracked(&self, table: &TableName) -> bool {
        self.tracked.as_ref().map_or(true, |t| t.contains(table))
    }

    fn record(
        &self,
        log: &mut ChangeLog,
        operation: Operation,
        key: &Key,
        session: SessionId,
    ) -> Option<EntryId> {
        self.is_tracked(&key.table)
            .then(|| log.append(operation, Some(key.clone()), session, None))
    }
}

// ---------------------------------------------------------------------------
// Staging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub(crate) struct StagingState {
    pub(crate) rows: BTreeMap<Key, Attributes>,
    pub(crate) log: ChangeLog,
    pub(crate) last_session: u64,
    pub(crate) migrations: Vec<String>,
}

#[derive(Debug)]
pub struct Staging {
    state: Mutex<StagingState>,
    capture: ChangeCapture,
}

impl Staging {
    pub fn new(config: &SyncConfig) -> Self {
        Self::from_state(StagingState::default(), config)
    }

    pub fn with_migrations(self, migrations: Vec<String>) -> Self {
        self.state.lock().migrations = migrations;
        self
    }

    pub(crate) fn from_state(state: StagingState, config: &SyncConfig) -> Self {
        Self {
            state: Mutex::new(state),
            capture: ChangeCapture::from_config(config),
        }
    }

    pub(crate) fn snapshot_state(&self) -> StagingState {
        self.state.lock().clone()
    }

    /// Open a new writer session.
    pub fn session(&self) -> Session<'_> {
        let mut state = self.state.lock();
        state.last_session += 1;
        Session {
            staging: self,
            id: SessionId(state.last_session),
        }
    }

    pub fn read(&self, key: &Key) -> Option<Attributes> {
        self.state.lock().rows.get(key).cloned()
    }

    pub fn migrations(&self) -> Vec<String> {
        self.state.lock().migrations.clone()
    }

    /// Copy of every log entry in id order.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.state.lock().log.iter().cloned().collect()
    }

    pub fn log_len(&self) -> usize {
        self.state.lock().log.len()
    }

    pub fn max_entry_id(&self) -> Option<EntryId> {
        self.state.lock().log.max_id()
    }

    /// Run `f` against a consistent view of the log.
    pub fn with_log<T>(&self, f: impl FnOnce(&ChangeLog) -> T) -> T {
        f(&self.state.lock().log)
    }

    pub(crate) fn with_state<T>(&self, f: impl FnOnce(&StagingState) -> T) -> T {
        f(&self.state.lock())
    }

    pub fn find_commit(&self, id: EntryId) -> Result<Commit, SyncError> {
        self.with_log(|log| Commit::find(log, id))
    }

    pub fn commits_containing(&self, key: &Key) -> Vec<Commit> {
        self.with_log(|log| Commit::containing(log, key))
    }

    /// Run `f` as one atomic unit.
    ///
    /// Writers are blocked until the unit ends. Log deletions requested
    /// through the unit are applied only when `f` returns `Ok`.
    pub fn unit<T>(
        &self,
        f: impl FnOnce(&mut Unit<'_>) -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let mut state = self.state.lock();
        let (value, doomed) = {
            let mut unit = Unit {
                state: &state,
                doomed: BTreeSet::new(),
            };
            let value = f(&mut unit)?;
            (value, unit.doomed)
        };
        for id in doomed {
            state.log.remove(id);
        }
        Ok(value)
    }

    fn write_row(
        &self,
        session: SessionId,
        operation: Operation,
        key: &Key,
        attributes: Option<Attributes>,
    ) -> Result<Option<EntryId>, SyncError> {
        let mut state = self.state.lock();
        match operation {
            Operation::Insert => {
                if state.rows.contains_key(key) {
                    return Err(StoreError::Conflict { key: key.clone() }.into());
                }
                state.rows.insert(key.clone(), attributes.unwrap_or_default());
            }
            Operation::Update => {
                let Some(row) = state.rows.get_mut(key) else {
                    return Err(StoreError::Missing { key: key.clone() }.into());
                };
                row.extend(attributes.unwrap_or_default());
            }
            Operation::Delete => {
                if state.rows.remove(key).is_none() {
                    return Ok(None);
                }
            }
            Operation::CommitStart | Operation::CommitEnd => return Ok(None),
        }
        Ok(self.capture.record(&mut state.log, operation, key, session))
    }

    pub(crate) fn append_marker(
        &self,
        session: SessionId,
        operation: Operation,
        subject: Option<Key>,
    ) -> EntryId {
        self.state.lock().log.append(operation, None, session, subject)
    }

    /// Write the end marker and stamp the session's range.
    ///
    /// A range without content entries from the session leaves no trace:
    /// both markers are removed and `None` is returned. Entries in `except`
    /// tables count as content but stay unstamped.
    pub(crate) fn close_commit(
        &self,
        session: SessionId,
        start: EntryId,
        subject: Option<&Key>,
        except: &BTreeSet<TableName>,
    ) -> Option<Commit> {
        let mut state = self.state.lock();
        let end = state.log.append(Operation::CommitEnd, None, session, None);
        let content = state.log.session_content_in(session, start, end);
        if content == 0 {
            state.log.remove(start);
            state.log.remove(end);
            return None;
        }
        let subject_table = subject.map(|k| &k.table);
        state.log.stamp(session, start, end, start, |entry| {
            entry.key.as_ref().is_some_and(|k| {
                except.contains(&k.table) && subject_table != Some(&k.table)
            })
        });
        Some(Commit {
            id: start,
            end_id: Some(end),
            session,
            subject: subject.cloned(),
        })
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A writer connection. Entries it produces carry its id.
#[derive(Debug)]
pub struct Session<'s> {
    pub(crate) staging: &'s Staging,
    pub(crate) id: SessionId,
}

impl<'s> Session<'s> {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn staging(&self) -> &'s Staging {
        self.staging
    }

    /// Insert a new row. Fails with `StoreError::Conflict` if the key exists.
    pub fn insert(&self, key: &Key, attributes: Attributes) -> Result<Option<EntryId>, SyncError> {
        self.staging
            .write_row(self.id, Operation::Insert, key, Some(attributes))
    }

    /// Merge `attributes` into an existing row.
    pub fn update(&self, key: &Key, attributes: Attributes) -> Result<Option<EntryId>, SyncError> {
        self.staging
            .write_row(self.id, Operation::Update, key, Some(attributes))
    }

    /// Delete a row. Deleting an absent row is a no-op and logs nothing.
    pub fn delete(&self, key: &Key) -> Result<Option<EntryId>, SyncError> {
        self.staging.write_row(self.id, Operation::Delete, key, None)
    }

    pub fn read(&self, key: &Key) -> Option<Attributes> {
        self.staging.read(key)
    }

    /// Start building a commit in this session.
    pub fn capture<'a>(&'a self) -> Capture<'a, 's> {
        Capture::new(self)
    }
}

// ---------------------------------------------------------------------------
// Unit
// ---------------------------------------------------------------------------

/// View of staging inside an atomic unit.
pub struct Unit<'a> {
    state: &'a StagingState,
    doomed: BTreeSet<EntryId>,
}

impl Unit<'_> {
    /// Current staging attributes. Repeatable for the life of the unit.
    pub fn read(&self, key: &Key) -> Option<&Attributes> {
        self.state.rows.get(key)
    }

    /// A log entry, unless it is missing or already marked for deletion.
    pub fn entry(&self, id: EntryId) -> Option<&LogEntry> {
        if self.doomed.contains(&id) {
            return None;
        }
        self.state.log.get(id)
    }

    pub fn log(&self) -> &ChangeLog {
        &self.state.log
    }

    pub fn is_autosync_eligible(&self, id: EntryId, ghost_mode: bool) -> bool {
        self.entry(id)
            .is_some_and(|entry| self.state.log.is_autosync_eligible(entry, ghost_mode))
    }

    /// Mark an entry for deletion. Returns false if it is already gone.
    pub fn delete_entry(&mut self, id: EntryId) -> bool {
        self.state.log.get(id).is_some() && self.doomed.insert(id)
    }

    /// Mark every entry for `key` with id <= `max` for deletion.
    pub fn delete_key_up_to(&mut self, key: &Key, max: EntryId) -> usize {
        let ids = self.state.log.ids_for_key_up_to(key, max);
        ids.into_iter().filter(|id| self.doomed.insert(*id)).count()
    }

    pub fn pending_deletions(&self) -> usize {
        self.doomed.len()
    }
}
