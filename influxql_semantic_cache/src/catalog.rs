//! Schema knowledge used to tell tags from fields and to type projected columns.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::cache::{EngineError, QueryEngine};
use crate::model::{DataType, QueryResult, Value};
use crate::time::Precision;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct MeasurementSchema {
    tags: BTreeSet<String>,
    fields: BTreeMap<String, DataType>,
}

/// The tag keys and field types of every measurement in a database.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    measurements: HashMap<String, MeasurementSchema>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register tag keys for `measurement`.
    pub fn with_tags<I, S>(mut self, measurement: &str, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.measurements
            .entry(measurement.to_string())
            .or_default()
            .tags
            .extend(tags.into_iter().map(Into::into));
        self
    }

    /// Register a field of `measurement` with its type.
    pub fn with_field(mut self, measurement: &str, field: &str, datatype: DataType) -> Self {
        self.measurements
            .entry(measurement.to_string())
            .or_default()
            .fields
            .insert(field.to_string(), datatype);
        self
    }

    pub fn is_tag(&self, measurement: &str, name: &str) -> bool {
        self.measurements
            .get(measurement)
            .is_some_and(|m| m.tags.contains(name))
    }

    /// All tag keys of `measurement`, sorted.
    pub fn tag_keys(&self, measurement: &str) -> Vec<String> {
        self.measurements
            .get(measurement)
            .map(|m| m.tags.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn field_type(&self, measurement: &str, field: &str) -> Option<DataType> {
        self.measurements
            .get(measurement)
            .and_then(|m| m.fields.get(field).copied())
    }

    /// Build a catalog from the results of `SHOW TAG KEYS` and `SHOW FIELD KEYS`.
    ///
    /// Each series of the results is one measurement. Rows that do not have the expected
    /// shape and field types that have no [`DataType`] equivalent are skipped.
    pub fn from_show_results(tag_keys: &QueryResult, field_keys: &QueryResult) -> Self {
        let mut catalog = Self::new();

        for table in &tag_keys.tables {
            let tags = table.rows.iter().filter_map(|row| match row.first() {
                Some(Value::String(tag)) => Some(tag.clone()),
                _ => None,
            });
            catalog = catalog.with_tags(&table.name, tags);
        }

        for table in &field_keys.tables {
            for row in &table.rows {
                match (row.first(), row.get(1)) {
                    (Some(Value::String(field)), Some(Value::String(field_type))) => {
                        match DataType::from_field_type(field_type) {
                            Some(dt) => catalog = catalog.with_field(&table.name, field, dt),
                            None => {
                                debug!(measurement = %table.name, %field, %field_type, "skipping field of unsupported type")
                            }
                        }
                    }
                    _ => debug!(measurement = %table.name, ?row, "skipping malformed field key row"),
                }
            }
        }

        catalog
    }

    /// Load the catalog of `database` by running `SHOW TAG KEYS` and `SHOW FIELD KEYS`.
    pub async fn fetch<E: QueryEngine + ?Sized>(
        engine: &E,
        database: &str,
    ) -> Result<Self, EngineError> {
        let tag_keys = engine
            .execute("SHOW TAG KEYS", database, Precision::Nanosecond)
            .await?;
        let field_keys = engine
            .execute("SHOW FIELD KEYS", database, Precision::Nanosecond)
            .await?;
        Ok(Self::from_show_results(&tag_keys, &field_keys))
    }
}
