use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::PrimaryKey;

/// Version attached to rows of versioned merge engines.
pub type RowVersion = u64;

/// Current state of a source row, keyed by column name.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRow {
    pub primary_key: PrimaryKey,
    pub values: Map<String, Value>,
}

impl SourceRow {
    pub fn new(primary_key: impl Into<PrimaryKey>, values: Map<String, Value>) -> Self {
        Self {
            primary_key: primary_key.into(),
            values,
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }
}

/// A row in the shape of the destination table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DestinationRow {
    pub values: Map<String, Value>,
}

impl DestinationRow {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.values.insert(column.into(), value.into());
    }

    /// Returns the value of `column` as an unsigned integer, if it is one.
    pub fn get_u64(&self, column: &str) -> Option<u64> {
        self.values.get(column).and_then(Value::as_u64)
    }

    /// Returns the textual primary key stored in `column`.
    ///
    /// Strings are taken as is and numbers in their decimal form, matching how keys are
    /// captured.
    pub fn primary_key(&self, column: &str) -> Option<PrimaryKey> {
        match self.values.get(column)? {
            Value::String(key) => Some(PrimaryKey::new(key.as_str())),
            Value::Number(key) => Some(PrimaryKey::new(key.to_string())),
            _ => None,
        }
    }
}

/// Name of a destination node, as configured in the service's `databases` section.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaAlias(String);

impl ReplicaAlias {
    pub fn new(alias: impl Into<String>) -> Self {
        Self(alias.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicaAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ReplicaAlias {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ReplicaAlias {
    fn from(value: String) -> Self {
        Self(value)
    }
}
