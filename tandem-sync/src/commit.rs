//! Commit boundaries: capturing a session's writes into one atomic unit,
//! and finding commits again in the log.
//!
//! A commit is identified by the id of its start marker. Closing it stamps
//! every unstamped entry of the session between the start and end markers
//! with that id.

use std::collections::{BTreeMap, BTreeSet};

use tandem_core::types::{EntryId, Key, LogEntry, Operation, SessionId, TableName};

use crate::error::SyncError;
use crate::log::ChangeLog;
use crate::staging::Session;

/// Handle to a commit found in, or written to, the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub id: EntryId,
    /// `None` while the commit is still open.
    pub end_id: Option<EntryId>,
    pub session: SessionId,
    pub subject: Option<Key>,
}

impl Commit {
    pub fn is_open(&self) -> bool {
        self.end_id.is_none()
    }

    /// Look up a closed commit by id.
    ///
    /// Fails with [`SyncError::CommitNotFound`] unless exactly one start and
    /// one end marker carry `commit_id = id`.
    pub fn find(log: &ChangeLog, id: EntryId) -> Result<Commit, SyncError> {
        let mut starts = Vec::new();
        let mut ends = Vec::new();
        for entry in log.with_commit(id) {
            match entry.operation {
                Operation::CommitStart => starts.push(entry),
                Operation::CommitEnd => ends.push(entry),
                _ => {}
            }
        }
        match (starts.as_slice(), ends.as_slice()) {
            ([start], [end]) if start.session == end.session && start.id < end.id => Ok(Commit {
                id,
                end_id: Some(end.id),
                session: start.session,
                subject: start.subject.clone(),
            }),
            _ => Err(SyncError::CommitNotFound { id }),
        }
    }

    /// Every commit holding an entry for `key`.
    ///
    /// Unstamped entries still count: an entry written inside an open commit
    /// yields that open commit.
    pub fn containing(log: &ChangeLog, key: &Key) -> Vec<Commit> {
        let mut found = BTreeMap::new();
        for entry in log.matching(key) {
            match entry.commit_id {
                Some(id) => {
                    if let Ok(commit) = Commit::find(log, id) {
                        found.insert(id, commit);
                    }
                }
                None => {
                    if let Some(start) = log.open_commit_for(entry).and_then(|id| log.get(id)) {
                        found.insert(start.id, Commit::open(start));
                    }
                }
            }
        }
        found.into_values().collect()
    }

    fn open(start: &LogEntry) -> Commit {
        Commit {
            id: start.id,
            end_id: None,
            session: start.session,
            subject: start.subject.clone(),
        }
    }

    /// The commit's entries in id order. For an open commit these are the
    /// session's unstamped entries written after the start marker.
    pub fn entries<'l>(&self, log: &'l ChangeLog) -> Vec<&'l LogEntry> {
        match self.end_id {
            Some(_) => log.with_commit(self.id).collect(),
            None => log
                .iter()
                .filter(|e| e.id >= self.id && e.session == self.session && !e.is_contained())
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

type Body<'a, 's> = Box<dyn FnOnce(&Session<'s>) -> Result<(), SyncError> + 'a>;

/// Builder for a captured commit. Obtain one with [`Session::capture`].
///
/// ```ignore
/// let commit = session
///     .capture()
///     .subject(post.clone())
///     .except("audits")
///     .body(|s| {
///         s.insert(&post, attrs)?;
///         Ok(())
///     })
///     .run()?;
/// ```
pub struct Capture<'a, 's> {
    session: &'a Session<'s>,
    subject: Option<Key>,
    except: BTreeSet<TableName>,
    body: Option<Body<'a, 's>>,
}

impl<'a, 's> Capture<'a, 's> {
    pub(crate) fn new(session: &'a Session<'s>) -> Self {
        Self {
            session,
            subject: None,
            except: BTreeSet::new(),
            body: None,
        }
    }

    /// Record `key` as the commit's declared subject.
    pub fn subject(mut self, key: Key) -> Self {
        self.subject = Some(key);
        self
    }

    /// Leave entries of `table` unstamped, unless it is the subject's table.
    pub fn except(mut self, table: impl Into<TableName>) -> Self {
        self.except.insert(table.into());
        self
    }

    pub fn body<F>(mut self, body: F) -> Self
    where
        F: FnOnce(&Session<'s>) -> Result<(), SyncError> + 'a,
    {
        self.body = Some(Box::new(body));
        self
    }

    /// Open the start marker, run the body, then close and stamp the range.
    ///
    /// The commit is closed even when the body fails; the body's error is
    /// returned afterwards. Returns `None` when nothing was captured.
    pub fn run(self) -> Result<Option<Commit>, SyncError> {
        let body = self.body.ok_or(SyncError::SyncBlockRequired)?;
        let staging = self.session.staging;
        let session = self.session.id;

        let start = staging.append_marker(session, Operation::CommitStart, self.subject.clone());
        let outcome = body(self.session);
        let commit = staging.close_commit(session, start, self.subject.as_ref(), &self.except);

        match &commit {
            Some(c) => tracing::debug!("closed commit {} for session {}", c.id, session),
            None => tracing::debug!("empty capture in session {}", session),
        }
        outcome?;
        Ok(commit)
    }
}
