//! Checklist: the set of log entries that must be synced together with a
//! subject.
//!
//! Entries are connected when they share a commit or a key. The closure is
//! computed breadth first to a fixpoint, then widened by one hop across the
//! subject rows' belongs-to associations.
//!
//! Confirmation classification:
//! 1. entries outside any commit are auto-approved
//! 2. the subject entry itself is auto-approved
//! 3. entries for subject records are auto-approved
//! 4. entries of a commit whose declared subject is a subject record are auto-approved
//! 5. everything else needs confirmation

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};

use tandem_core::config::SyncConfig;
use tandem_core::types::{Attributes, EntryId, Key, LogEntry, Operation};

use crate::error::SyncError;
use crate::log::ChangeLog;
use crate::staging::Staging;
use crate::store::RowStore;

/// Deduplicated entries keyed by id.
pub type EntrySet = BTreeMap<EntryId, LogEntry>;

type ConfirmFilter<'a> = Box<dyn Fn(&LogEntry) -> bool + 'a>;

// ---------------------------------------------------------------------------
// Closure
// ---------------------------------------------------------------------------

/// Every entry transitively connected to `seed` through shared commits or
/// shared keys, plus uncontained entries for any key discovered.
///
/// Control markers are collected but never expanded.
pub fn related_entries<'l, I>(log: &'l ChangeLog, seed: I) -> EntrySet
where
    I: IntoIterator<Item = &'l LogEntry>,
{
    let mut related = EntrySet::new();
    let mut expanded_keys = BTreeSet::new();
    let mut expanded_commits = BTreeSet::new();

    let mut worklist: Vec<&LogEntry> = Vec::new();
    for entry in seed.into_iter().filter(|e| e.is_content()) {
        if related.insert(entry.id, entry.clone()).is_none() {
            worklist.push(entry);
        }
    }

    while !worklist.is_empty() {
        let mut pulled: Vec<&LogEntry> = Vec::new();
        for entry in worklist.drain(..) {
            if let Some(commit_id) = entry.commit_id {
                if expanded_commits.insert(commit_id) {
                    pulled.extend(log.with_commit(commit_id));
                }
            }
            if let Some(key) = &entry.key {
                if expanded_keys.insert(key.clone()) {
                    pulled.extend(log.matching(key).filter(|e| e.is_contained()));
                }
            }
        }

        let (content, control): (Vec<&LogEntry>, Vec<&LogEntry>) =
            pulled.into_iter().partition(|e| e.is_content());
        for entry in control {
            related.entry(entry.id).or_insert_with(|| entry.clone());
        }
        for entry in content {
            if let Entry::Vacant(slot) = related.entry(entry.id) {
                slot.insert(entry.clone());
                worklist.push(entry);
            }
        }
    }

    for key in &expanded_keys {
        for entry in log.matching(key).filter(|e| !e.is_contained()) {
            related.entry(entry.id).or_insert_with(|| entry.clone());
        }
    }
    related
}

/// Keys one belongs-to hop away from the content entries in `entries`,
/// excluding keys already present.
pub fn associated_records<'r, F>(entries: &EntrySet, config: &SyncConfig, read: F) -> BTreeSet<Key>
where
    F: Fn(&Key) -> Option<&'r Attributes>,
{
    let present: BTreeSet<&Key> = entries.values().filter_map(|e| e.key.as_ref()).collect();
    let mut found = BTreeSet::new();
    for key in &present {
        let associations = config.associations(&key.table);
        if associations.is_empty() {
            continue;
        }
        let Some(row) = read(key) else { continue };
        for assoc in associations {
            let Some(id) = row.get(&assoc.foreign_key).and_then(|v| v.as_i64()) else {
                continue;
            };
            let target = Key::new(assoc.table.clone(), id);
            if !present.contains(&target) {
                found.insert(target);
            }
        }
    }
    found
}

/// One entry per key: delete beats insert beats update, the highest id
/// breaking ties. Result is in id order.
pub fn compact_entries<'e, I>(entries: I) -> Vec<LogEntry>
where
    I: IntoIterator<Item = &'e LogEntry>,
{
    let mut winners: BTreeMap<&Key, &LogEntry> = BTreeMap::new();
    for entry in entries {
        let Some(key) = entry.key.as_ref() else { continue };
        winners
            .entry(key)
            .and_modify(|current| {
                let rank = |e: &LogEntry| (e.operation.precedence(), e.id);
                if rank(entry) > rank(*current) {
                    *current = entry;
                }
            })
            .or_insert(entry);
    }
    let mut compacted: Vec<LogEntry> = winners.into_values().cloned().collect();
    compacted.sort_by_key(|e| e.id);
    compacted
}

// ---------------------------------------------------------------------------
// Checklist
// ---------------------------------------------------------------------------

/// The computed closure for one subject, owned by the caller for the
/// duration of one sync decision.
#[derive(Debug, Clone)]
pub struct Checklist {
    subject_records: BTreeSet<Key>,
    subject_entry: Option<EntryId>,
    affected: EntrySet,
    syncing: Vec<LogEntry>,
    creations: Vec<LogEntry>,
    updates: Vec<LogEntry>,
    deletions: Vec<LogEntry>,
    confirmations: Vec<LogEntry>,
}

impl Checklist {
    /// Checklist for one or more records.
    pub fn for_records<'a>(keys: impl IntoIterator<Item = Key>) -> ChecklistBuilder<'a> {
        ChecklistBuilder {
            subject_records: keys.into_iter().collect(),
            subject_entry: None,
            confirm_filter: None,
        }
    }

    /// Checklist for a single log entry; its key becomes the subject record.
    pub fn for_entry<'a>(entry: &LogEntry) -> ChecklistBuilder<'a> {
        ChecklistBuilder {
            subject_records: entry.key.iter().cloned().collect(),
            subject_entry: Some(entry.id),
            confirm_filter: None,
        }
    }

    pub fn subject_records(&self) -> &BTreeSet<Key> {
        &self.subject_records
    }

    /// The subject entry itself, or any entry for a subject record.
    pub fn is_subject(&self, entry: &LogEntry) -> bool {
        self.subject_entry == Some(entry.id)
            || entry
                .key
                .as_ref()
                .is_some_and(|k| self.subject_records.contains(k))
    }

    /// Every related log row, markers included. These rows are deleted once
    /// the checklist has been synced.
    pub fn affected_entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.affected.values()
    }

    /// Compacted content entries to apply, one per key.
    pub fn syncing_entries(&self) -> &[LogEntry] {
        &self.syncing
    }

    /// Keys whose final fate is an insert of a row missing from production.
    pub fn creations(&self) -> &[LogEntry] {
        &self.creations
    }

    pub fn updates(&self) -> &[LogEntry] {
        &self.updates
    }

    pub fn deletions(&self) -> &[LogEntry] {
        &self.deletions
    }

    /// Entries pulled in through other records' commits.
    pub fn requires_confirmation(&self) -> &[LogEntry] {
        &self.confirmations
    }

    pub fn is_confirmation_required(&self) -> bool {
        !self.confirmations.is_empty()
    }
}

pub struct ChecklistBuilder<'a> {
    subject_records: BTreeSet<Key>,
    subject_entry: Option<EntryId>,
    confirm_filter: Option<ConfirmFilter<'a>>,
}

impl<'a> ChecklistBuilder<'a> {
    /// Only surface confirmable entries accepted by `filter`; the rest are
    /// dropped from the confirmation bucket.
    pub fn confirm_if(mut self, filter: impl Fn(&LogEntry) -> bool + 'a) -> Self {
        self.confirm_filter = Some(Box::new(filter));
        self
    }

    pub fn build(
        self,
        staging: &Staging,
        production: &dyn RowStore,
        config: &SyncConfig,
    ) -> Result<Checklist, SyncError> {
        let (affected, commit_subjects) = staging.with_state(|state| {
            let seed = self
                .subject_records
                .iter()
                .flat_map(|key| state.log.matching(key))
                .chain(self.subject_entry.and_then(|id| state.log.get(id)));
            let mut affected = related_entries(&state.log, seed);

            let associated = associated_records(&affected, config, |k| state.rows.get(k));
            let hop = associated.iter().flat_map(|key| state.log.matching(key));
            affected.extend(related_entries(&state.log, hop));

            let commit_subjects: BTreeMap<EntryId, Option<Key>> = affected
                .values()
                .filter_map(|e| e.commit_id)
                .map(|id| (id, state.log.get(id).and_then(|s| s.subject.clone())))
                .collect();
            (affected, commit_subjects)
        });

        let content = || affected.values().filter(|e| e.is_content());

        let mut confirmations = Vec::new();
        for entry in content() {
            if self.is_auto_approved(entry, &commit_subjects) {
                continue;
            }
            if self.confirm_filter.as_ref().map_or(true, |f| f(entry)) {
                confirmations.push(entry.clone());
            }
        }

        let syncing = compact_entries(content());
        let mut creations = Vec::new();
        let mut updates = Vec::new();
        let mut deletions = Vec::new();
        for entry in &syncing {
            match entry.operation {
                Operation::Delete => deletions.push(entry.clone()),
                Operation::Insert => {
                    let exists = match &entry.key {
                        Some(key) => production.read(key)?.is_some(),
                        None => false,
                    };
                    if exists {
                        updates.push(entry.clone());
                    } else {
                        creations.push(entry.clone());
                    }
                }
                Operation::Update => updates.push(entry.clone()),
                Operation::CommitStart | Operation::CommitEnd => {}
            }
        }

        Ok(Checklist {
            subject_records: self.subject_records,
            subject_entry: self.subject_entry,
            affected,
            syncing,
            creations,
            updates,
            deletions,
            confirmations,
        })
    }

    fn is_auto_approved(
        &self,
        entry: &LogEntry,
        commit_subjects: &BTreeMap<EntryId, Option<Key>>,
    ) -> bool {
        let Some(commit_id) = entry.commit_id else {
            return true;
        };
        if self.subject_entry == Some(entry.id) {
            return true;
        }
        if entry
            .key
            .as_ref()
            .is_some_and(|k| self.subject_records.contains(k))
        {
            return true;
        }
        commit_subjects
            .get(&commit_id)
            .and_then(Option::as_ref)
            .is_some_and(|subject| self.subject_records.contains(subject))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tandem_core::types::SessionId;

    fn entry(id: u64, operation: Operation, key: i64) -> LogEntry {
        LogEntry {
            id: EntryId(id),
            operation,
            key: Some(Key::new("posts", key)),
            commit_id: None,
            session: SessionId(1),
            subject: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[rstest]
    #[case(&[Operation::Insert, Operation::Update, Operation::Delete], Operation::Delete)]
    #[case(&[Operation::Delete, Operation::Insert, Operation::Update], Operation::Delete)]
    #[case(&[Operation::Update, Operation::Insert, Operation::Update], Operation::Insert)]
    #[case(&[Operation::Update, Operation::Update], Operation::Update)]
    fn compaction_precedence(#[case] ops: &[Operation], #[case] expected: Operation) {
        let entries: Vec<LogEntry> = ops
            .iter()
            .enumerate()
            .map(|(i, op)| entry(i as u64 + 1, *op, 1))
            .collect();
        let compacted = compact_entries(&entries);
        assert_eq!(compacted.len(), 1);
        assert_eq!(compacted[0].operation, expected);
    }

    #[test]
    fn compaction_keeps_latest_among_equal_operations() {
        let entries = vec![entry(1, Operation::Update, 1), entry(4, Operation::Update, 1)];
        assert_eq!(compact_entries(&entries)[0].id, EntryId(4));
    }

    #[test]
    fn compaction_ignores_control_entries_and_keeps_keys_apart() {
        let mut marker = entry(3, Operation::CommitStart, 0);
        marker.key = None;
        let entries = vec![entry(1, Operation::Insert, 1), marker, entry(2, Operation::Update, 2)];
        let compacted = compact_entries(&entries);
        let ids: Vec<u64> = compacted.iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
