//! Sync configuration stored as YAML.
//!
//! # Storage layout
//!
//! ```text
//! ~/.tandem/
//!   config.yaml   (mode 0600)
//!   state.json    (workspace snapshot, owned by tandem-sync)
//! ```
//!
//! # API pattern
//!
//! Every function touching the filesystem has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::TableName;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_POLLING_DELAY_SECS: u64 = 5;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A belongs-to style association: `foreign_key` on the owning table holds
/// the id of a row in `table`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Association {
    pub name: String,
    pub foreign_key: String,
    pub table: TableName,
}

/// A tracked table and the associations traversed by the checklist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: TableName,
    #[serde(default)]
    pub belongs_to: Vec<Association>,
}

impl TableSchema {
    pub fn new(name: impl Into<TableName>) -> Self {
        Self {
            name: name.into(),
            belongs_to: vec![],
        }
    }

    pub fn belongs_to(
        mut self,
        name: &str,
        foreign_key: &str,
        table: impl Into<TableName>,
    ) -> Self {
        self.belongs_to.push(Association {
            name: name.to_owned(),
            foreign_key: foreign_key.to_owned(),
            table: table.into(),
        });
        self
    }
}

/// Root of `config.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Tables whose writes are captured. Empty means every table is tracked.
    #[serde(default)]
    pub tables: Vec<TableSchema>,
    /// Columns never copied to production, per table.
    #[serde(default)]
    pub ignored_columns: BTreeMap<TableName, Vec<String>>,
    /// Sync entries even while their commit is still open.
    #[serde(default)]
    pub ghost_mode: bool,
    /// Both logical stores are one physical store; syncing is a no-op.
    #[serde(default)]
    pub single_connection: bool,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_polling_delay_secs")]
    pub polling_delay_secs: u64,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_polling_delay_secs() -> u64 {
    DEFAULT_POLLING_DELAY_SECS
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tables: vec![],
            ignored_columns: BTreeMap::new(),
            ghost_mode: false,
            single_connection: false,
            batch_size: DEFAULT_BATCH_SIZE,
            polling_delay_secs: DEFAULT_POLLING_DELAY_SECS,
        }
    }
}

impl SyncConfig {
    pub fn with_tables(tables: Vec<TableSchema>) -> Self {
        Self {
            tables,
            ..Self::default()
        }
    }

    pub fn is_tracked(&self, table: &TableName) -> bool {
        self.tables.is_empty() || self.tables.iter().any(|t| &t.name == table)
    }

    pub fn associations(&self, table: &TableName) -> &[Association] {
        self.tables
            .iter()
            .find(|t| &t.name == table)
            .map(|t| t.belongs_to.as_slice())
            .unwrap_or(&[])
    }

    pub fn ignored_columns(&self, table: &TableName) -> &[String] {
        self.ignored_columns
            .get(table)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn polling_delay(&self) -> Duration {
        Duration::from_secs(self.polling_delay_secs)
    }

    /// Reject configurations that name a table twice.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for table in &self.tables {
            if !seen.insert(&table.name) {
                return Err(ConfigError::DuplicateTable {
                    table: table.name.0.clone(),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.tandem/`
pub fn tandem_dir_at(home: &Path) -> PathBuf {
    home.join(".tandem")
}

/// `<home>/.tandem/config.yaml`: pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    tandem_dir_at(home).join("config.yaml")
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load `<home>/.tandem/config.yaml`.
///
/// A missing file yields [`SyncConfig::default`]; malformed YAML returns
/// `ConfigError::Parse` with the file path.
pub fn load_at(home: &Path) -> Result<SyncConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(SyncConfig::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    let config: SyncConfig =
        serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse { path, source: e })?;
    config.validate()?;
    Ok(config)
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<SyncConfig, ConfigError> {
    load_at(&home()?)
}

/// Atomically save the config.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_at(home: &Path, config: &SyncConfig) -> Result<(), ConfigError> {
    config.validate()?;
    let dir = tandem_dir_at(home);
    std::fs::create_dir_all(&dir)?;
    let path = config_path_at(home);
    let tmp_path = path.with_file_name("config.yaml.tmp");

    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// `save_at` convenience wrapper.
pub fn save(config: &SyncConfig) -> Result<(), ConfigError> {
    save_at(&home()?, config)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn blog_config() -> SyncConfig {
        let mut config = SyncConfig::with_tables(vec![
            TableSchema::new("authors"),
            TableSchema::new("posts").belongs_to("author", "author_id", "authors"),
        ]);
        config
            .ignored_columns
            .insert(TableName::from("posts"), vec!["draft_notes".to_string()]);
        config
    }

    #[test]
    fn config_path_is_correct() {
        let home = TempDir::new().unwrap();
        assert!(config_path_at(home.path()).ends_with(".tandem/config.yaml"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let home = TempDir::new().unwrap();
        let config = load_at(home.path()).expect("load");
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn save_and_load_roundtrip() {
        let home = TempDir::new().unwrap();
        let config = blog_config();
        save_at(home.path(), &config).expect("save");
        let loaded = load_at(home.path()).expect("load");
        assert_eq!(loaded, config);
        let tmp = config_path_at(home.path()).with_file_name("config.yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn empty_table_list_tracks_everything() {
        let config = SyncConfig::default();
        assert!(config.is_tracked(&TableName::from("anything")));
    }

    #[test]
    fn declared_tables_limit_tracking() {
        let config = blog_config();
        assert!(config.is_tracked(&TableName::from("posts")));
        assert!(!config.is_tracked(&TableName::from("sessions")));
    }

    #[test]
    fn associations_and_ignored_columns_lookup() {
        let config = blog_config();
        let assoc = config.associations(&TableName::from("posts"));
        assert_eq!(assoc.len(), 1);
        assert_eq!(assoc[0].foreign_key, "author_id");
        assert!(config.associations(&TableName::from("authors")).is_empty());
        assert_eq!(
            config.ignored_columns(&TableName::from("posts")),
            ["draft_notes".to_string()]
        );
        assert!(config.ignored_columns(&TableName::from("authors")).is_empty());
    }

    #[test]
    fn duplicate_tables_are_rejected() {
        let config = SyncConfig::with_tables(vec![TableSchema::new("a"), TableSchema::new("a")]);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTable { .. }));
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(ConfigError::HomeNotFound.to_string().contains("home directory"));
    }
}
