use std::path::{Path, PathBuf};

pub const AUTOSYNC_STATUS_FILE: &str = "autosync.json";

pub fn tandem_root(home: &Path) -> PathBuf {
    tandem_core::config::tandem_dir_at(home)
}

pub fn run_dir(home: &Path) -> PathBuf {
    tandem_root(home).join("run")
}

pub fn autosync_status_path(home: &Path) -> PathBuf {
    run_dir(home).join(AUTOSYNC_STATUS_FILE)
}
