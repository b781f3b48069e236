//! The autosync loop: one drain pass, then sleep, until shutdown.
//!
//! Passes run on the blocking pool. A pass failing with a do-not-retry
//! error is logged and the loop carries on; any other error ends it.
//! Shutdown is only observed while sleeping, so a pass in progress always
//! completes.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use tandem_sync::pipeline::PassReport;
use tandem_sync::SyncError;

use crate::error::DaemonError;

/// Counters accumulated over the life of one loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutosyncStats {
    pub passes: usize,
    pub applied: usize,
    pub deferred: usize,
}

pub async fn auto_sync<F>(
    pass: F,
    polling_delay: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<AutosyncStats, DaemonError>
where
    F: Fn() -> Result<PassReport, SyncError> + Send + Sync + 'static,
{
    let pass = Arc::new(pass);
    let mut stats = AutosyncStats::default();

    loop {
        let run_pass = pass.clone();
        let result = tokio::task::spawn_blocking(move || run_pass())
            .await
            .map_err(|err| DaemonError::Task(format!("autosync pass join error: {err}")))?;

        match result {
            Ok(report) => {
                stats.passes += 1;
                stats.applied += report.applied;
                if report.applied > 0 {
                    tracing::info!(
                        applied = report.applied,
                        remaining = report.remaining,
                        "autosync pass complete"
                    );
                } else {
                    tracing::debug!(remaining = report.remaining, "autosync pass idle");
                }
            }
            Err(err) if err.is_do_not_retry() => {
                stats.deferred += 1;
                tracing::warn!(error = %err, "autosync pass deferred");
            }
            Err(err) => {
                tracing::error!(error = %err, "autosync stopped");
                return Err(err.into());
            }
        }

        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = tokio::time::sleep(polling_delay) => {}
        }
    }

    tracing::info!(
        passes = stats.passes,
        applied = stats.applied,
        deferred = stats.deferred,
        "autosync loop finished"
    );
    Ok(stats)
}
