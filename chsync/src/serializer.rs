use std::collections::HashSet;
use std::fmt;

use serde_json::{Map, Value};

use crate::bail;
use crate::error::{ErrorKind, SyncResult};
use crate::types::{DestinationRow, SourceRow};

/// Converts a source row into the row shape of a destination table.
pub trait RowSerializer: fmt::Debug + Send + Sync {
    fn serialize(&self, row: &SourceRow) -> SyncResult<DestinationRow>;
}

/// Copies JSON columns from the source row.
///
/// Without an explicit field list every source column is copied. Null values are treated as
/// missing and replaced by the configured default, since the destination columns are not
/// nullable. A selected column that is missing and has no default fails the row.
#[derive(Debug, Clone, Default)]
pub struct JsonRowSerializer {
    fields: Option<Vec<String>>,
    exclude: HashSet<String>,
    defaults: Map<String, Value>,
}

impl JsonRowSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the output to `fields`, in this order.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn excluding<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn with_default(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.defaults.insert(field.into(), value.into());
        self
    }

    fn value_of(&self, row: &SourceRow, field: &str) -> Option<Value> {
        match row.get(field) {
            Some(Value::Null) | None => self.defaults.get(field).cloned(),
            Some(value) => Some(value.clone()),
        }
    }
}

impl RowSerializer for JsonRowSerializer {
    fn serialize(&self, row: &SourceRow) -> SyncResult<DestinationRow> {
        let mut values = Map::new();

        match &self.fields {
            Some(fields) => {
                for field in fields.iter().filter(|field| !self.exclude.contains(*field)) {
                    let Some(value) = self.value_of(row, field) else {
                        bail!(
                            ErrorKind::SerializationFailure,
                            "Missing column value",
                            format!(
                                "row `{}` has no value and no default for column `{field}`",
                                row.primary_key
                            )
                        );
                    };
                    values.insert(field.clone(), value);
                }
            }
            None => {
                for field in row.values.keys() {
                    if self.exclude.contains(field) {
                        continue;
                    }
                    if let Some(value) = self.value_of(row, field) {
                        values.insert(field.clone(), value);
                    }
                }

                for (field, default) in &self.defaults {
                    if !self.exclude.contains(field) && !values.contains_key(field) {
                        values.insert(field.clone(), default.clone());
                    }
                }
            }
        }

        Ok(DestinationRow::new(values))
    }
}
