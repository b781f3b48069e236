use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use tandem_core::config;
use tandem_sync::pipeline::{self, SyncScope};

use crate::autosync::{auto_sync, AutosyncStats};
use crate::error::{io_err, DaemonError};
use crate::paths::{autosync_status_path, run_dir};

/// Written to `run/autosync.json` when the loop shuts down cleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutosyncStatus {
    #[serde(flatten)]
    pub stats: AutosyncStats,
    pub stopped_at_unix: u64,
}

/// Start the autosync runtime and block the current thread until it exits.
pub fn start_blocking(
    home: &Path,
    polling_delay: Option<Duration>,
) -> Result<AutosyncStats, DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), polling_delay))
}

/// Run the autosync loop against the workspace under `home` until ctrl-c
/// or a fatal sync error.
pub async fn run(
    home: PathBuf,
    polling_delay: Option<Duration>,
) -> Result<AutosyncStats, DaemonError> {
    let sync_config = config::load_at(&home)?;
    let delay = polling_delay.unwrap_or_else(|| sync_config.polling_delay());
    ensure_runtime_dirs(&home)?;
    tracing::info!(home = %home.display(), delay_secs = delay.as_secs(), "autosync starting");

    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let autosync_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            let pass = move || pipeline::run(&home, SyncScope::Batched { limit: None });
            let result = auto_sync(pass, delay, shutdown_rx).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, stopping autosync");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Task(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (autosync_result, signal_result) = tokio::join!(autosync_handle, signal_handle);
    handle_join("signal_handler", signal_result)?;
    let stats = match autosync_result {
        Ok(inner) => inner?,
        Err(err) => {
            return Err(DaemonError::Task(format!(
                "autosync task join failure: {err}"
            )))
        }
    };

    write_status(&home, &stats)?;
    Ok(stats)
}

/// Status of the last cleanly stopped loop, if any.
pub fn read_status(home: &Path) -> Result<Option<AutosyncStatus>, DaemonError> {
    let path = autosync_status_path(home);
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(Some(serde_json::from_str(&contents)?))
}

fn write_status(home: &Path, stats: &AutosyncStats) -> Result<(), DaemonError> {
    let status = AutosyncStatus {
        stats: stats.clone(),
        stopped_at_unix: unix_seconds_now(),
    };
    let path = autosync_status_path(home);
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(&status)?).map_err(|e| io_err(&tmp, e))?;
    fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    let dir = run_dir(home);
    fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Task(format!("{task} task join failure: {err}"))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}
