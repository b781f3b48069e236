//! Synchronizer: applies staging log entries to production.
//!
//! Every apply runs inside an atomic staging [`Unit`]: eligibility is
//! re-checked and rows are re-read under the same lock that writers take,
//! and consumed log rows are only deleted once the unit succeeds.
//!
//! A drain pass (`sync`):
//! 1. fix the ceiling at the current max entry id
//! 2. select up to `limit` eligible entries below the upper bound, newest first
//! 3. compact per key, order deletes then updates then inserts
//! 4. apply in one unit and delete the key's log rows up to the applied id
//! 5. continue below the batch's lowest id until nothing is selected
//! 6. collect markers of closed commits that no longer hold content

use std::sync::Arc;

use once_cell::sync::OnceCell;

use tandem_core::config::SyncConfig;
use tandem_core::types::{Attributes, EntryId, Key, LogEntry, Operation};

use crate::checklist::{compact_entries, Checklist, ChecklistBuilder};
use crate::error::SyncError;
use crate::hooks::{HookChain, SyncHook, SyncRole, SyncedEntry};
use crate::staging::{Staging, Unit};
use crate::store::{schema_fingerprint, RowStore};

/// Migration fingerprints of both stores, computed once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaCheck {
    pub staging: String,
    pub production: String,
}

impl SchemaCheck {
    pub fn matches(&self) -> bool {
        self.staging == self.production
    }
}

pub struct Synchronizer {
    staging: Arc<Staging>,
    production: Arc<dyn RowStore>,
    config: SyncConfig,
    hooks: HookChain,
    schema: OnceCell<SchemaCheck>,
}

impl Synchronizer {
    pub fn new(staging: Arc<Staging>, production: Arc<dyn RowStore>, config: SyncConfig) -> Self {
        Self {
            staging,
            production,
            config,
            hooks: HookChain::new(),
            schema: OnceCell::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn SyncHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn staging(&self) -> &Staging {
        &self.staging
    }

    pub fn production(&self) -> &dyn RowStore {
        self.production.as_ref()
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // -----------------------------------------------------------------------
    // Schema check
    // -----------------------------------------------------------------------

    /// Compare migration fingerprints of both stores. The first successful
    /// comparison is cached for the lifetime of the synchronizer.
    pub fn schema_check(&self) -> Result<&SchemaCheck, SyncError> {
        self.schema.get_or_try_init(|| {
            let check = SchemaCheck {
                staging: schema_fingerprint(&self.staging.migrations()),
                production: schema_fingerprint(&self.production.migrations()?),
            };
            if !check.matches() {
                tracing::warn!(
                    "schema mismatch: staging {} production {}",
                    check.staging,
                    check.production
                );
            }
            Ok(check)
        })
    }

    pub fn schemas_match(&self) -> Result<bool, SyncError> {
        Ok(self.schema_check()?.matches())
    }

    /// Run the schema check outside any unit. It reads staging migrations,
    /// which takes the staging lock.
    fn ensure_schemas_match(&self) -> Result<(), SyncError> {
        let check = self.schema_check()?;
        mismatch(check)
    }

    /// Per-entry check inside a unit, from the cached comparison only.
    fn ensure_cached_schemas_match(&self) -> Result<(), SyncError> {
        match self.schema.get() {
            Some(check) => mismatch(check),
            None => Err(SyncError::SchemaMismatch {
                staging: "unchecked".into(),
                production: "unchecked".into(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Apply
    // -----------------------------------------------------------------------

    fn strip_ignored(&self, key: &Key, row: &Attributes) -> Attributes {
        let ignored = self.config.ignored_columns(&key.table);
        row.iter()
            .filter(|(column, _)| !ignored.contains(column))
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect()
    }

    /// Apply one content entry to production using the row as the unit
    /// sees it, then run the hooks.
    fn sync_entry(
        &self,
        unit: &Unit<'_>,
        entry: &LogEntry,
        role: Option<SyncRole>,
    ) -> Result<(), SyncError> {
        self.ensure_cached_schemas_match()?;
        let Some(key) = entry.key.as_ref() else {
            return Ok(());
        };

        let written = match entry.operation {
            Operation::Delete => {
                self.production.delete(key)?;
                None
            }
            Operation::Insert | Operation::Update => match unit.read(key) {
                Some(row) => {
                    let attributes = self.strip_ignored(key, row);
                    self.production.write(key, &attributes)?;
                    Some(attributes)
                }
                None => {
                    self.production.delete(key)?;
                    None
                }
            },
            Operation::CommitStart | Operation::CommitEnd => return Ok(()),
        };
        tracing::debug!("applied {} {} (entry {})", entry.operation, key, entry.id);

        self.hooks.run(
            &SyncedEntry {
                entry,
                attributes: written.as_ref(),
            },
            role,
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Checklist sync
    // -----------------------------------------------------------------------

    /// Build a checklist against this synchronizer's stores.
    pub fn checklist(&self, builder: ChecklistBuilder<'_>) -> Result<Checklist, SyncError> {
        builder.build(&self.staging, self.production.as_ref(), &self.config)
    }

    /// Apply a checklist in one unit, then delete every affected log row.
    ///
    /// Entries whose key has no affected row left in the log are skipped,
    /// so running the same checklist twice applies nothing the second time.
    pub fn sync_checklist(&self, checklist: &Checklist) -> Result<usize, SyncError> {
        if self.config.single_connection {
            return Ok(0);
        }
        self.ensure_schemas_match()?;
        let applied = self.staging.unit(|unit| {
            let mut applied = 0;
            for entry in checklist.syncing_entries() {
                let live = checklist
                    .affected_entries()
                    .any(|a| a.key == entry.key && unit.entry(a.id).is_some());
                if !live {
                    continue;
                }
                let role = if checklist.is_subject(entry) {
                    SyncRole::Subject
                } else {
                    SyncRole::Affected
                };
                self.sync_entry(unit, entry, Some(role))?;
                applied += 1;
            }
            for entry in checklist.affected_entries() {
                unit.delete_entry(entry.id);
            }
            Ok(applied)
        })?;
        tracing::info!("checklist sync applied {} entries", applied);
        Ok(applied)
    }

    // -----------------------------------------------------------------------
    // Drain
    // -----------------------------------------------------------------------

    /// Up to `limit` eligible entries with id <= `upper`, newest first.
    pub fn select_batch(&self, upper: EntryId, limit: usize) -> Vec<LogEntry> {
        let ghost = self.config.ghost_mode;
        self.staging
            .with_log(|log| log.eligible_batch(upper, limit, ghost))
    }

    /// Apply a selected batch in one unit.
    ///
    /// The batch is compacted and ordered first. Candidates that are gone or
    /// no longer eligible are deferred. For each applied entry, log rows for
    /// its key up to the applied id are deleted; newer rows it superseded in
    /// the batch stay for the next pass. Returns the number applied.
    pub fn apply_batch(&self, batch: &[LogEntry]) -> Result<usize, SyncError> {
        let ghost = self.config.ghost_mode;
        let candidates = order_batch(batch);
        if candidates.is_empty() {
            return Ok(0);
        }
        self.ensure_schemas_match()?;

        self.staging.unit(|unit| {
            let mut applied = 0;
            for entry in &candidates {
                let Some(key) = entry.key.as_ref() else {
                    continue;
                };
                if !unit.is_autosync_eligible(entry.id, ghost) {
                    tracing::warn!("deferring entry {} for {}: no longer eligible", entry.id, key);
                    continue;
                }
                self.sync_entry(unit, entry, None)?;
                unit.delete_key_up_to(key, entry.id);
                applied += 1;
            }
            Ok(applied)
        })
    }

    /// Drain eligible entries present when the pass starts, `limit` at a
    /// time. Returns the number of entries applied.
    pub fn sync(&self, limit: usize) -> Result<usize, SyncError> {
        if self.config.single_connection {
            return Ok(0);
        }
        let Some(ceiling) = self.staging.max_entry_id() else {
            return Ok(0);
        };
        let limit = limit.max(1);

        let mut upper = ceiling;
        let mut total = 0;
        loop {
            let batch = self.select_batch(upper, limit);
            let Some(lowest) = batch.last().map(|e| e.id) else {
                break;
            };
            total += self.apply_batch(&batch)?;
            match lowest.0.checked_sub(1) {
                Some(next) if next > 0 => upper = EntryId(next),
                _ => break,
            }
        }

        let collected = self.collect_empty_commits(ceiling)?;
        tracing::info!(
            "sync pass applied {} entries, collected {} commit markers",
            total,
            collected
        );
        Ok(total)
    }

    /// One pass at the configured batch size.
    pub fn sync_pass(&self) -> Result<usize, SyncError> {
        self.sync(self.config.batch_size)
    }

    /// Apply everything in the log regardless of eligibility, in one unit.
    ///
    /// Start markers of still-open commits are kept.
    pub fn sync_all(&self) -> Result<usize, SyncError> {
        if self.config.single_connection {
            return Ok(0);
        }
        self.ensure_schemas_match()?;
        let applied = self.staging.unit(|unit| {
            let content: Vec<LogEntry> = unit
                .log()
                .iter()
                .filter(|e| e.is_content())
                .cloned()
                .collect();
            let ordered = order_batch(&content);
            for entry in &ordered {
                self.sync_entry(unit, entry, None)?;
            }

            let consumed: Vec<EntryId> = unit
                .log()
                .iter()
                .filter(|e| e.is_content() || e.is_contained())
                .map(|e| e.id)
                .collect();
            for id in consumed {
                unit.delete_entry(id);
            }
            Ok(ordered.len())
        })?;
        tracing::info!("full drain applied {} entries", applied);
        Ok(applied)
    }

    /// Delete markers of closed commits at or below `ceiling` with no
    /// content entries left.
    pub fn collect_empty_commits(&self, ceiling: EntryId) -> Result<usize, SyncError> {
        self.staging.unit(|unit| {
            let ids = unit.log().empty_closed_commits(ceiling);
            Ok(ids.into_iter().filter(|id| unit.delete_entry(*id)).count())
        })
    }
}

fn mismatch(check: &SchemaCheck) -> Result<(), SyncError> {
    if check.matches() {
        return Ok(());
    }
    Err(SyncError::SchemaMismatch {
        staging: check.staging.clone(),
        production: check.production.clone(),
    })
}

/// Apply order within a batch: deletes, then updates, then inserts.
fn apply_rank(operation: Operation) -> u8 {
    match operation {
        Operation::Delete => 0,
        Operation::Update => 1,
        Operation::Insert => 2,
        Operation::CommitStart | Operation::CommitEnd => 3,
    }
}

/// Compact a batch to one entry per key, then order it for applying:
/// deletes, updates, inserts, each newest first.
pub fn order_batch(batch: &[LogEntry]) -> Vec<LogEntry> {
    let mut ordered = compact_entries(batch);
    ordered.sort_by(|a, b| {
        apply_rank(a.operation)
            .cmp(&apply_rank(b.operation))
            .then_with(|| b.id.cmp(&a.id))
    });
    ordered
}
