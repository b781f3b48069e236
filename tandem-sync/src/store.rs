//! Row store accessor used for production, plus the in-memory implementation.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use sha2::{Digest, Sha256};

use tandem_core::types::{Attributes, Key};

use crate::error::StoreError;

/// Key-addressed access to one store. Each call is atomic for its row.
pub trait RowStore: Send + Sync {
    fn read(&self, key: &Key) -> Result<Option<Attributes>, StoreError>;

    /// Update-else-insert.
    fn write(&self, key: &Key, attributes: &Attributes) -> Result<(), StoreError>;

    /// Returns the number of rows removed (0 or 1).
    fn delete(&self, key: &Key) -> Result<usize, StoreError>;

    /// Ordered identifiers of the migrations applied to this store.
    fn migrations(&self) -> Result<Vec<String>, StoreError>;
}

/// SHA-256 hex digest over an ordered migration list.
pub fn schema_fingerprint(migrations: &[String]) -> String {
    let mut h = Sha256::new();
    for id in migrations {
        h.update(id.as_bytes());
        h.update(b"\n");
    }
    hex::encode(h.finalize())
}

/// Ordered in-memory row store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<BTreeMap<Key, Attributes>>,
    migrations: Vec<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_migrations(migrations: Vec<String>) -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            migrations,
        }
    }

    pub fn from_rows(
        migrations: Vec<String>,
        rows: impl IntoIterator<Item = (Key, Attributes)>,
    ) -> Self {
        Self {
            rows: RwLock::new(rows.into_iter().collect()),
            migrations,
        }
    }

    /// Copy of every row, ordered by key.
    pub fn rows(&self) -> Vec<(Key, Attributes)> {
        self.rows
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

impl RowStore for MemoryStore {
    fn read(&self, key: &Key) -> Result<Option<Attributes>, StoreError> {
        Ok(self.rows.read().get(key).cloned())
    }

    fn write(&self, key: &Key, attributes: &Attributes) -> Result<(), StoreError> {
        self.rows.write().insert(key.clone(), attributes.clone());
        Ok(())
    }

    fn delete(&self, key: &Key) -> Result<usize, StoreError> {
        Ok(usize::from(self.rows.write().remove(key).is_some()))
    }

    fn migrations(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.migrations.clone())
    }
}
