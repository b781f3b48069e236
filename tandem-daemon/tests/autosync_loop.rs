use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tandem_core::types::{Attributes, Key};
use tandem_daemon::{auto_sync, AutosyncStats};
use tandem_sync::pipeline::{self, PassReport, SyncScope};
use tandem_sync::{SyncError, Workspace};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_test::assert_ok;

#[tokio::test(start_paused = true)]
async fn do_not_retry_errors_keep_the_loop_alive() {
    let (tx, rx) = broadcast::channel::<()>(4);
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();

    let result = auto_sync(
        move || {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if call < 3 {
                return Err(SyncError::DoNotRetry("production unreachable".into()));
            }
            let _ = tx.send(());
            Ok(PassReport::new(2, 0))
        },
        Duration::from_secs(5),
        rx,
    )
    .await;

    let stats = assert_ok!(result);
    assert_eq!(
        stats,
        AutosyncStats {
            passes: 1,
            applied: 2,
            deferred: 2,
        }
    );
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn loop_drains_a_saved_workspace() {
    let home = TempDir::new().expect("home");
    let workspace = Workspace::open_at(home.path()).expect("open");
    let session = workspace.staging.session();
    for id in 1..=2 {
        let mut attrs = Attributes::new();
        attrs.insert("title".into(), json!(format!("post {id}")));
        session.insert(&Key::new("posts", id), attrs).expect("insert");
    }
    workspace.save_at(home.path()).expect("save");
    drop(workspace);

    let (tx, rx) = broadcast::channel::<()>(4);
    let path = home.path().to_path_buf();
    let result = auto_sync(
        move || {
            let report = pipeline::run(&path, SyncScope::Batched { limit: None })?;
            if report.remaining == 0 {
                let _ = tx.send(());
            }
            Ok(report)
        },
        Duration::from_secs(1),
        rx,
    )
    .await;

    let stats = assert_ok!(result);
    assert_eq!(stats.applied, 2);
    assert_eq!(stats.passes, 1);

    let reopened = Workspace::open_at(home.path()).expect("reopen");
    assert_eq!(reopened.production.len(), 2);
    assert_eq!(reopened.staging.log_len(), 0);
}
