//! Domain types for the change-capture log.
//!
//! Every row is addressed by a [`Key`], valid in both the staging and the
//! production store. All types are serializable via serde so the workspace
//! snapshot and the CLI can carry them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Column name -> value map for a single row.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed table name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableName(pub String);

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TableName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TableName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Primary key of a row within its table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub i64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Store-assigned, monotonic log entry id. Also identifies a commit (the id
/// of its start marker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifier of the writer session that produced a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// Logical identity of a row across both stores.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    pub table: TableName,
    pub id: RecordId,
}

impl Key {
    pub fn new(table: impl Into<TableName>, id: impl Into<RecordId>) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.table, self.id)
    }
}

impl From<(&str, i64)> for Key {
    fn from((table, id): (&str, i64)) -> Self {
        Key::new(table, id)
    }
}

impl FromStr for Key {
    type Err = String;

    /// Parses the `table#id` form produced by `Display`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (table, id) = s
            .rsplit_once('#')
            .ok_or_else(|| format!("invalid key '{s}'; expected <table>#<id>"))?;
        if table.is_empty() {
            return Err(format!("invalid key '{s}'; table name is empty"));
        }
        let id = id
            .parse::<i64>()
            .map_err(|e| format!("invalid record id in '{s}': {e}"))?;
        Ok(Key::new(table, id))
    }
}

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// What a log entry records: a row mutation or a commit boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Insert,
    Update,
    Delete,
    CommitStart,
    CommitEnd,
}

impl Operation {
    /// Row mutations carry a key; commit markers never do.
    pub fn is_content(self) -> bool {
        matches!(self, Operation::Insert | Operation::Update | Operation::Delete)
    }

    pub fn is_control(self) -> bool {
        !self.is_content()
    }

    /// Compaction rank: delete beats insert beats update.
    pub fn precedence(self) -> u8 {
        match self {
            Operation::Delete => 3,
            Operation::Insert => 2,
            Operation::Update => 1,
            Operation::CommitStart | Operation::CommitEnd => 0,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Insert => write!(f, "insert"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
            Operation::CommitStart => write!(f, "commit_start"),
            Operation::CommitEnd => write!(f, "commit_end"),
        }
    }
}

// ---------------------------------------------------------------------------
// LogEntry
// ---------------------------------------------------------------------------

/// One captured row mutation or commit boundary marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: EntryId,
    pub operation: Operation,
    /// Present on content entries only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,
    /// Start-entry id of the owning commit; `None` until a commit closes over it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<EntryId>,
    pub session: SessionId,
    /// Declared commit subject, recorded on commit start markers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Key>,
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    pub fn is_content(&self) -> bool {
        self.operation.is_content()
    }

    pub fn is_contained(&self) -> bool {
        self.commit_id.is_some()
    }

    pub fn matches(&self, key: &Key) -> bool {
        self.key.as_ref() == Some(key)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
