use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tandem_core::config::SyncConfig;
use tandem_core::types::{Attributes, Key, TableName};
use tandem_sync::{
    Checklist, HookFlow, MemoryStore, RowStore, Staging, StoreError, SyncError, SyncHook,
    SyncedEntry, Synchronizer,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn attrs(title: &str) -> Attributes {
    let mut a = Attributes::new();
    a.insert("title".into(), json!(title));
    a
}

fn post(id: i64) -> Key {
    Key::new("posts", id)
}

fn setup(config: SyncConfig) -> (Arc<Staging>, Arc<MemoryStore>, Synchronizer) {
    init_logging();
    let staging = Arc::new(Staging::new(&config));
    let production = Arc::new(MemoryStore::new());
    let sync = Synchronizer::new(staging.clone(), production.clone(), config);
    (staging, production, sync)
}

/// Production store that is never reachable.
struct UnreachableStore;

impl RowStore for UnreachableStore {
    fn read(&self, _: &Key) -> Result<Option<Attributes>, StoreError> {
        Ok(None)
    }

    fn write(&self, _: &Key, _: &Attributes) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    fn delete(&self, _: &Key) -> Result<usize, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }

    fn migrations(&self) -> Result<Vec<String>, StoreError> {
        Ok(vec![])
    }
}

#[derive(Default)]
struct RoleRecorder {
    seen: Mutex<Vec<(&'static str, Key)>>,
}

impl RoleRecorder {
    fn record(&self, stage: &'static str, synced: &SyncedEntry<'_>) -> HookFlow {
        if let Some(key) = &synced.entry.key {
            self.seen.lock().push((stage, key.clone()));
        }
        HookFlow::Continue
    }
}

impl SyncHook for RoleRecorder {
    fn synced(&self, synced: &SyncedEntry<'_>) -> HookFlow {
        self.record("synced", synced)
    }

    fn synced_as_subject(&self, synced: &SyncedEntry<'_>) -> HookFlow {
        self.record("subject", synced)
    }

    fn synced_as_affected(&self, synced: &SyncedEntry<'_>) -> HookFlow {
        self.record("affected", synced)
    }
}

// ---------------------------------------------------------------------------
// Drain
// ---------------------------------------------------------------------------

#[test]
fn committed_insert_reaches_production_and_log_empties() {
    let (staging, production, sync) = setup(SyncConfig::default());
    let session = staging.session();
    session
        .capture()
        .subject(post(1))
        .body(|s| s.insert(&post(1), attrs("hello")).map(|_| ()))
        .run()
        .expect("capture");

    assert_eq!(sync.sync(100).expect("sync"), 1);
    assert_eq!(production.read(&post(1)).expect("read"), Some(attrs("hello")));
    assert_eq!(staging.log_len(), 0);
    assert_eq!(sync.sync(100).expect("second sync"), 0);
}

#[test]
fn small_batches_still_drain_everything() {
    let (staging, production, sync) = setup(SyncConfig::default());
    let session = staging.session();
    for id in 1..=5 {
        session.insert(&post(id), attrs("x")).expect("insert");
    }
    assert_eq!(sync.sync(2).expect("sync"), 5);
    assert_eq!(production.len(), 5);
    assert_eq!(staging.log_len(), 0);
}

#[test]
fn repeated_writes_to_one_key_apply_latest_row() {
    let (staging, production, sync) = setup(SyncConfig::default());
    let session = staging.session();
    session.insert(&post(1), attrs("a")).expect("insert");
    session.update(&post(1), attrs("b")).expect("update");
    session.update(&post(1), attrs("c")).expect("update");

    // The insert wins compaction; the updates it superseded stay logged.
    assert_eq!(sync.sync(100).expect("sync"), 1);
    assert_eq!(production.read(&post(1)).expect("read"), Some(attrs("c")));
    assert_eq!(staging.log_len(), 2);

    assert_eq!(sync.sync(100).expect("second pass"), 1);
    assert_eq!(production.read(&post(1)).expect("read"), Some(attrs("c")));
    assert_eq!(staging.log_len(), 0);
}

#[test]
fn fresh_synchronizer_runs_every_sync_without_a_prior_schema_check() {
    let (staging, production, sync) = setup(SyncConfig::default());
    staging.session().insert(&post(1), attrs("a")).expect("insert");
    assert_eq!(sync.sync(100).expect("sync"), 1);

    let config = SyncConfig::default();
    let checklist_sync =
        Synchronizer::new(staging.clone(), production.clone(), config.clone());
    staging.session().update(&post(1), attrs("b")).expect("update");
    let checklist = checklist_sync
        .checklist(Checklist::for_records([post(1)]))
        .expect("checklist");
    assert_eq!(checklist_sync.sync_checklist(&checklist).expect("sync"), 1);

    let full_sync = Synchronizer::new(staging.clone(), production.clone(), config);
    staging.session().insert(&post(2), attrs("c")).expect("insert");
    assert_eq!(full_sync.sync_all().expect("sync_all"), 1);

    assert_eq!(production.read(&post(1)).expect("read"), Some(attrs("b")));
    assert_eq!(production.len(), 2);
    assert_eq!(staging.log_len(), 0);
}

#[test]
fn delete_then_reinsert_keeps_the_new_row() {
    let (staging, production, sync) = setup(SyncConfig::default());
    let session = staging.session();
    session.insert(&post(1), attrs("v1")).expect("insert");
    sync.sync(100).expect("sync");

    session.delete(&post(1)).expect("delete");
    session.insert(&post(1), attrs("v2")).expect("reinsert");

    // Delete beats save within the pass; the reinsert waits for the next one.
    assert_eq!(sync.sync(100).expect("first pass"), 1);
    assert!(production.read(&post(1)).expect("read").is_none());
    assert_eq!(staging.log_len(), 1);

    assert_eq!(sync.sync(100).expect("second pass"), 1);
    assert_eq!(production.read(&post(1)).expect("read"), staging.read(&post(1)));
    assert_eq!(staging.log_len(), 0);
    assert_eq!(sync.sync(100).expect("third pass"), 0);
}

#[test]
fn save_then_delete_in_one_batch_removes_the_row() {
    let (staging, production, sync) = setup(SyncConfig::default());
    let session = staging.session();
    session.insert(&post(1), attrs("v1")).expect("insert");
    sync.sync(100).expect("sync");

    session.update(&post(1), attrs("v2")).expect("update");
    session.delete(&post(1)).expect("delete");

    assert_eq!(sync.sync(100).expect("sync"), 1);
    assert!(production.is_empty());
    assert_eq!(staging.log_len(), 0);
}

#[test]
fn drain_applies_deletes_before_updates_before_inserts() {
    let recorder = Arc::new(RoleRecorder::default());
    let config = SyncConfig::default();
    let staging = Arc::new(Staging::new(&config));
    let production = Arc::new(MemoryStore::new());
    let sync = Synchronizer::new(staging.clone(), production.clone(), config)
        .with_hook(recorder.clone());

    let session = staging.session();
    session.insert(&post(1), attrs("kept")).expect("insert");
    session.insert(&post(2), attrs("doomed")).expect("insert");
    sync.sync(100).expect("seed");
    recorder.seen.lock().clear();

    session.insert(&post(3), attrs("new")).expect("insert");
    session.update(&post(1), attrs("edited")).expect("update");
    session.delete(&post(2)).expect("delete");

    assert_eq!(sync.sync(100).expect("sync"), 3);
    let seen = recorder.seen.lock().clone();
    assert_eq!(
        seen,
        vec![("synced", post(2)), ("synced", post(1)), ("synced", post(3))]
    );
    assert_eq!(production.read(&post(1)).expect("read"), Some(attrs("edited")));
    assert!(production.read(&post(2)).expect("read").is_none());
    assert_eq!(production.read(&post(3)).expect("read"), Some(attrs("new")));
}

#[test]
fn deletes_propagate() {
    let (staging, production, sync) = setup(SyncConfig::default());
    let session = staging.session();
    session.insert(&post(1), attrs("a")).expect("insert");
    sync.sync(100).expect("sync");
    session.delete(&post(1)).expect("delete");

    assert_eq!(sync.sync(100).expect("sync"), 1);
    assert!(production.is_empty());
}

#[test]
fn newer_write_between_select_and_apply_wins() {
    let (staging, production, sync) = setup(SyncConfig::default());
    let session = staging.session();
    session.insert(&post(1), attrs("old")).expect("insert");

    let ceiling = staging.max_entry_id().expect("entry");
    let batch = sync.select_batch(ceiling, 10);
    let newer = session
        .update(&post(1), attrs("newer"))
        .expect("update")
        .expect("logged");

    assert_eq!(sync.apply_batch(&batch).expect("apply"), 1);
    assert_eq!(production.read(&post(1)).expect("read"), Some(attrs("newer")));
    let remaining: Vec<_> = staging.entries().into_iter().map(|e| e.id).collect();
    assert_eq!(remaining, vec![newer]);

    assert_eq!(sync.sync(100).expect("sync"), 1);
    assert_eq!(staging.log_len(), 0);
}

#[test]
fn open_commit_is_deferred_until_closed() {
    let (staging, production, sync) = setup(SyncConfig::default());
    let writer = staging.session();
    let other = staging.session();

    writer
        .capture()
        .body(|s| {
            s.insert(&post(1), attrs("in commit"))?;
            other.insert(&post(2), attrs("outside"))?;
            assert_eq!(sync.sync(100)?, 1);
            assert!(production.read(&post(1))?.is_none());
            Ok(())
        })
        .run()
        .expect("capture");

    assert_eq!(sync.sync(100).expect("sync"), 1);
    assert_eq!(production.len(), 2);
    assert_eq!(staging.log_len(), 0);
}

#[test]
fn ghost_mode_syncs_inside_open_commits() {
    let config = SyncConfig {
        ghost_mode: true,
        ..SyncConfig::default()
    };
    let (staging, production, sync) = setup(config);
    let session = staging.session();

    session
        .capture()
        .body(|s| {
            s.insert(&post(1), attrs("ghost"))?;
            assert_eq!(sync.sync(100)?, 1);
            Ok(())
        })
        .run()
        .expect("capture");
    assert_eq!(production.len(), 1);
}

#[test]
fn ignored_columns_never_reach_production() {
    let config = SyncConfig {
        ignored_columns: BTreeMap::from([(TableName::from("posts"), vec!["secret".to_string()])]),
        ..SyncConfig::default()
    };
    let (staging, production, sync) = setup(config);
    let mut row = attrs("visible");
    row.insert("secret".into(), json!("hidden"));
    staging.session().insert(&post(1), row).expect("insert");

    sync.sync(100).expect("sync");
    assert_eq!(production.read(&post(1)).expect("read"), Some(attrs("visible")));
}

#[test]
fn single_connection_mode_is_a_no_op() {
    let config = SyncConfig {
        single_connection: true,
        ..SyncConfig::default()
    };
    let (staging, production, sync) = setup(config);
    staging.session().insert(&post(1), attrs("a")).expect("insert");

    assert_eq!(sync.sync(100).expect("sync"), 0);
    assert_eq!(sync.sync_all().expect("sync_all"), 0);
    assert!(production.is_empty());
    assert_eq!(staging.log_len(), 1);
}

#[test]
fn schema_mismatch_blocks_every_apply() {
    init_logging();
    let config = SyncConfig::default();
    let staging =
        Arc::new(Staging::new(&config).with_migrations(vec!["001".into(), "002".into()]));
    let production = Arc::new(MemoryStore::with_migrations(vec!["001".into()]));
    let sync = Synchronizer::new(staging.clone(), production.clone(), config);
    staging.session().insert(&post(1), attrs("a")).expect("insert");

    assert!(!sync.schemas_match().expect("check"));
    let err = sync.sync(100).unwrap_err();
    assert!(matches!(err, SyncError::SchemaMismatch { .. }));
    assert_eq!(staging.log_len(), 1);
    assert!(production.is_empty());
}

#[test]
fn unreachable_production_leaves_log_untouched() {
    init_logging();
    let config = SyncConfig::default();
    let staging = Arc::new(Staging::new(&config));
    let sync = Synchronizer::new(staging.clone(), Arc::new(UnreachableStore), config);
    let session = staging.session();
    session.insert(&post(1), attrs("a")).expect("insert");
    session.insert(&post(2), attrs("b")).expect("insert");

    let err = sync.sync(100).unwrap_err();
    assert!(err.is_do_not_retry());
    assert_eq!(staging.log_len(), 2);
}

#[test]
fn sync_all_ignores_open_commits_but_keeps_their_start_marker() {
    let (staging, production, sync) = setup(SyncConfig::default());
    let session = staging.session();

    session
        .capture()
        .body(|s| {
            s.insert(&post(1), attrs("a"))?;
            assert_eq!(sync.sync_all()?, 1);
            Ok(())
        })
        .run()
        .expect("capture");

    assert_eq!(production.len(), 1);
    assert_eq!(staging.log_len(), 0);
}

// ---------------------------------------------------------------------------
// Checklist sync
// ---------------------------------------------------------------------------

#[test]
fn syncing_a_record_carries_its_shared_commit() {
    let (staging, production, sync) = setup(SyncConfig::default());
    let session = staging.session();
    let s = Key::new("comments", 1);
    session
        .capture()
        .body(|w| w.insert(&post(1), attrs("r")).map(|_| ()))
        .run()
        .expect("commit 1");
    session
        .capture()
        .body(|w| {
            w.update(&post(1), attrs("r2"))?;
            w.insert(&s, attrs("s"))?;
            Ok(())
        })
        .run()
        .expect("commit 2");

    let checklist = sync
        .checklist(Checklist::for_records([post(1)]))
        .expect("checklist");
    assert_eq!(sync.sync_checklist(&checklist).expect("sync"), 2);

    assert_eq!(production.read(&post(1)).expect("read"), Some(attrs("r2")));
    assert!(production.read(&s).expect("read").is_some());
    assert_eq!(staging.log_len(), 0);
}

#[test]
fn sync_checklist_is_idempotent() {
    let (staging, production, sync) = setup(SyncConfig::default());
    staging.session().insert(&post(1), attrs("a")).expect("insert");

    let checklist = sync
        .checklist(Checklist::for_records([post(1)]))
        .expect("checklist");
    assert_eq!(sync.sync_checklist(&checklist).expect("first"), 1);
    assert_eq!(sync.sync_checklist(&checklist).expect("second"), 0);
    assert_eq!(production.len(), 1);
}

#[test]
fn hooks_see_subject_and_affected_roles() {
    let recorder = Arc::new(RoleRecorder::default());
    let config = SyncConfig::default();
    let staging = Arc::new(Staging::new(&config));
    let production = Arc::new(MemoryStore::new());
    let sync = Synchronizer::new(staging.clone(), production, config).with_hook(recorder.clone());

    let s = Key::new("comments", 1);
    staging
        .session()
        .capture()
        .body(|w| {
            w.insert(&post(1), attrs("r"))?;
            w.insert(&s, attrs("s"))?;
            Ok(())
        })
        .run()
        .expect("capture");

    let checklist = sync
        .checklist(Checklist::for_records([post(1)]))
        .expect("checklist");
    sync.sync_checklist(&checklist).expect("sync");

    let seen = recorder.seen.lock().clone();
    assert_eq!(
        seen,
        vec![
            ("synced", post(1)),
            ("subject", post(1)),
            ("synced", s.clone()),
            ("affected", s),
        ]
    );
}

#[test]
fn entry_checklist_syncs_its_own_entry_as_subject() {
    let recorder = Arc::new(RoleRecorder::default());
    let config = SyncConfig::default();
    let staging = Arc::new(Staging::new(&config));
    let sync = Synchronizer::new(staging.clone(), Arc::new(MemoryStore::new()), config)
        .with_hook(recorder.clone());

    let s = Key::new("comments", 1);
    staging
        .session()
        .capture()
        .body(|w| {
            w.insert(&s, attrs("s"))?;
            w.insert(&post(1), attrs("r"))?;
            Ok(())
        })
        .run()
        .expect("capture");

    let entry = staging
        .entries()
        .into_iter()
        .find(|e| e.key.as_ref() == Some(&post(1)))
        .expect("entry");
    let checklist = sync
        .checklist(Checklist::for_entry(&entry))
        .expect("checklist");
    assert!(checklist.is_subject(&entry));
    assert_eq!(sync.sync_checklist(&checklist).expect("sync"), 2);

    let seen = recorder.seen.lock().clone();
    assert!(seen.contains(&("subject", post(1))));
    assert!(seen.contains(&("affected", s)));
}
