use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bail;
use crate::error::{ErrorKind, SyncError};

/// Identifier of one sync unit: one queue, one lock and one version counter.
///
/// Usually the name of the logical table being synchronized.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImportKey(String);

impl ImportKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImportKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ImportKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Primary key of a source row in its textual form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrimaryKey(String);

impl PrimaryKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PrimaryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PrimaryKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PrimaryKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<i64> for PrimaryKey {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

/// Kind of a captured mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    /// Returns `true` when the row must be present at the destination after this operation.
    pub fn is_constructive(&self) -> bool {
        !matches!(self, OperationKind::Delete)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_static_str())
    }
}

impl FromStr for OperationKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" | "insert" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            other => bail!(
                ErrorKind::InvalidData,
                "Unknown operation kind",
                format!("operation kind `{other}` is not one of create, update, delete")
            ),
        }
    }
}

/// Queue assigned identifier of an [`Operation`].
///
/// Identifiers grow with enqueue order, so sorting by id restores the capture order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A mutation handed to the queue by the recorder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mutation {
    pub primary_key: PrimaryKey,
    pub kind: OperationKind,
    pub captured_at: DateTime<Utc>,
}

impl Mutation {
    /// Creates a mutation captured now.
    pub fn new(primary_key: impl Into<PrimaryKey>, kind: OperationKind) -> Self {
        Self {
            primary_key: primary_key.into(),
            kind,
            captured_at: Utc::now(),
        }
    }
}

/// A queued mutation of one row.
///
/// Operations are never modified once queued. A sync round removes them after their batch
/// was delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub id: OperationId,
    pub import_key: ImportKey,
    pub primary_key: PrimaryKey,
    pub kind: OperationKind,
    pub enqueued_at: DateTime<Utc>,
}
