//! The change log: append-only entries with key, commit and open-commit indexes.
//!
//! Entries are ordered by id and ids are never reused. A commit start marker
//! stays in the open set until its commit is stamped.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::Utc;

use tandem_core::types::{EntryId, Key, LogEntry, Operation, SessionId};

#[derive(Debug, Clone, Default)]
pub struct ChangeLog {
    entries: BTreeMap<EntryId, LogEntry>,
    by_key: HashMap<Key, BTreeSet<EntryId>>,
    by_commit: BTreeMap<EntryId, BTreeSet<EntryId>>,
    open_starts: BTreeSet<EntryId>,
    last_id: u64,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log (and its indexes) from persisted entries.
    pub fn from_entries(entries: impl IntoIterator<Item = LogEntry>, last_id: u64) -> Self {
        let mut log = Self::default();
        for entry in entries {
            log.last_id = log.last_id.max(entry.id.0);
            log.index(&entry);
            log.entries.insert(entry.id, entry);
        }
        log.last_id = log.last_id.max(last_id);
        log
    }

    pub fn append(
        &mut self,
        operation: Operation,
        key: Option<Key>,
        session: SessionId,
        subject: Option<Key>,
    ) -> EntryId {
        self.last_id += 1;
        let id = EntryId(self.last_id);
        let entry = LogEntry {
            id,
            operation,
            key,
            commit_id: None,
            session,
            subject,
            created_at: Utc::now(),
        };
        self.index(&entry);
        self.entries.insert(id, entry);
        id
    }

    pub fn get(&self, id: EntryId) -> Option<&LogEntry> {
        self.entries.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest id currently present.
    pub fn max_id(&self) -> Option<EntryId> {
        self.entries.keys().next_back().copied()
    }

    /// Highest id ever assigned, including removed entries.
    pub fn last_assigned(&self) -> u64 {
        self.last_id
    }

    /// Content entries for `key`, contained or not, in id order.
    pub fn matching<'a>(&'a self, key: &Key) -> impl Iterator<Item = &'a LogEntry> + 'a {
        self.by_key
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.entries.get(id))
    }

    /// Every entry stamped with `commit_id`, markers included.
    pub fn with_commit(&self, commit_id: EntryId) -> impl Iterator<Item = &LogEntry> + '_ {
        self.by_commit
            .get(&commit_id)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.entries.get(id))
    }

    /// Start markers whose commit has not been closed yet.
    pub fn open_starts(&self) -> impl Iterator<Item = &LogEntry> + '_ {
        self.open_starts.iter().filter_map(move |id| self.entries.get(id))
    }

    /// Innermost open commit of the entry's session that began before it.
    pub fn open_commit_for(&self, entry: &LogEntry) -> Option<EntryId> {
        self.open_starts
            .range(..entry.id)
            .rev()
            .find(|id| {
                self.entries
                    .get(*id)
                    .is_some_and(|start| start.session == entry.session)
            })
            .copied()
    }

    pub fn in_open_commit(&self, entry: &LogEntry) -> bool {
        self.open_commit_for(entry).is_some()
    }

    /// Content entries are eligible unless an open commit still encloses them.
    /// Ghost mode ignores open commits.
    pub fn is_autosync_eligible(&self, entry: &LogEntry, ghost_mode: bool) -> bool {
        entry.is_content() && (ghost_mode || !self.in_open_commit(entry))
    }

    /// Up to `limit` eligible entries with id <= `upper`, highest ids first.
    pub fn eligible_batch(&self, upper: EntryId, limit: usize, ghost_mode: bool) -> Vec<LogEntry> {
        self.entries
            .range(..=upper)
            .rev()
            .map(|(_, entry)| entry)
            .filter(|entry| self.is_autosync_eligible(entry, ghost_mode))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Ids of every entry for `key` with id <= `max`.
    pub fn ids_for_key_up_to(&self, key: &Key, max: EntryId) -> Vec<EntryId> {
        self.by_key
            .get(key)
            .map(|ids| ids.range(..=max).copied().collect())
            .unwrap_or_default()
    }

    /// Marker ids of closed commits (started at or below `ceiling`) whose
    /// content entries have all been consumed.
    pub fn empty_closed_commits(&self, ceiling: EntryId) -> Vec<EntryId> {
        let mut ids = Vec::new();
        for members in self.by_commit.range(..=ceiling).map(|(_, m)| m) {
            let all_control = members
                .iter()
                .filter_map(|id| self.entries.get(id))
                .all(|entry| entry.operation.is_control());
            if all_control {
                ids.extend(members.iter().copied());
            }
        }
        ids
    }

    /// Unstamped content entries of `session` with ids in `[start, end]`.
    pub fn session_content_in(&self, session: SessionId, start: EntryId, end: EntryId) -> usize {
        self.entries
            .range(start..=end)
            .filter(|(_, entry)| {
                entry.session == session && entry.commit_id.is_none() && entry.is_content()
            })
            .count()
    }

    /// Stamp unstamped entries of `session` in `[start, end]` with `commit_id`.
    ///
    /// Content entries for which `skip` returns true stay unstamped. Returns
    /// the number of content entries stamped.
    pub fn stamp(
        &mut self,
        session: SessionId,
        start: EntryId,
        end: EntryId,
        commit_id: EntryId,
        skip: impl Fn(&LogEntry) -> bool,
    ) -> usize {
        let ids: Vec<EntryId> = self
            .entries
            .range(start..=end)
            .map(|(_, entry)| entry)
            .filter(|entry| entry.session == session && entry.commit_id.is_none())
            .filter(|entry| !(entry.is_content() && skip(entry)))
            .map(|entry| entry.id)
            .collect();

        let mut content = 0;
        for id in ids {
            let Some(mut entry) = self.entries.remove(&id) else {
                continue;
            };
            self.unindex(&entry);
            entry.commit_id = Some(commit_id);
            if entry.is_content() {
                content += 1;
            }
            self.index(&entry);
            self.entries.insert(id, entry);
        }
        content
    }

    pub fn remove(&mut self, id: EntryId) -> Option<LogEntry> {
        let entry = self.entries.remove(&id)?;
        self.unindex(&entry);
        Some(entry)
    }

    fn index(&mut self, entry: &LogEntry) {
        if let Some(key) = &entry.key {
            self.by_key.entry(key.clone()).or_default().insert(entry.id);
        }
        match entry.commit_id {
            Some(commit_id) => {
                self.by_commit.entry(commit_id).or_default().insert(entry.id);
            }
            None if entry.operation == Operation::CommitStart => {
                self.open_starts.insert(entry.id);
            }
            None => {}
        }
    }

    fn unindex(&mut self, entry: &LogEntry) {
        if let Some(key) = &entry.key {
            if let Some(ids) = self.by_key.get_mut(key) {
                ids.remove(&entry.id);
                if ids.is_empty() {
                    self.by_key.remove(key);
                }
            }
        }
        if let Some(commit_id) = entry.commit_id {
            if let Some(ids) = self.by_commit.get_mut(&commit_id) {
                ids.remove(&entry.id);
                if ids.is_empty() {
                    self.by_commit.remove(&commit_id);
                }
            }
        }
        self.open_starts.remove(&entry.id);
    }
}
