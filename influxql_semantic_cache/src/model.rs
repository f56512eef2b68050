//! The tabular result model shared by the decomposer, key builder, codec and merge engine.
//!
//! A [`QueryResult`] is an ordered list of [`Table`]s, one per series. Each table carries the
//! measurement name, the tag set identifying the series, the column names and the rows. The
//! first column of every table is the timestamp.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::time::parse_timestamp;

/// The data type of a column, as recorded in a semantic key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Int64,
    Float64,
    Bool,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Bool => "bool",
        }
    }

    /// Maps the type names reported by `SHOW FIELD KEYS`.
    pub fn from_field_type(s: &str) -> Option<Self> {
        match s {
            "float" => Some(Self::Float64),
            "integer" | "unsigned" => Some(Self::Int64),
            "string" => Some(Self::String),
            "boolean" => Some(Self::Bool),
            _ => None,
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(Self::String),
            "int64" => Ok(Self::Int64),
            "float64" => Ok(Self::Float64),
            "bool" => Ok(Self::Bool),
            _ => Err(format!("unrecognized data type: {s}")),
        }
    }
}

/// A single cell of a result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
}

impl Value {
    /// The data type of the value, or `None` for nulls.
    pub fn datatype(&self) -> Option<DataType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(DataType::Bool),
            Self::Int64(_) => Some(DataType::Int64),
            Self::Float64(_) => Some(DataType::Float64),
            Self::String(_) => Some(DataType::String),
        }
    }

    /// Interpret the value as a nanosecond timestamp.
    ///
    /// Integers are taken as-is, integral floats are truncated and strings are parsed as
    /// RFC3339.
    pub fn timestamp_nanos(&self) -> Option<i64> {
        match self {
            Self::Int64(v) => Some(*v),
            Self::Float64(v) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            Self::String(s) => parse_timestamp(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

/// One series of a query result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default, rename = "values", skip_serializing_if = "Vec::is_empty")]
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_row(mut self, row: Vec<Value>) -> Self {
        self.rows.push(row);
        self
    }

    /// The canonical `k1=v1,k2=v2` rendering of the tag set, sorted by key. Tagless tables
    /// render as the empty string.
    pub fn tag_string(&self) -> String {
        let mut out = String::new();
        for (i, (k, v)) in self.tags.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(k);
            out.push('=');
            out.push_str(v);
        }
        out
    }

    fn row_timestamp(row: &[Value]) -> Option<i64> {
        row.first().and_then(Value::timestamp_nanos)
    }

    /// The timestamps of the first and last rows.
    pub fn time_range(&self) -> Option<(i64, i64)> {
        let first = Self::row_timestamp(self.rows.first()?)?;
        let last = Self::row_timestamp(self.rows.last()?)?;
        Some((first, last))
    }
}

/// The result of a single query: an ordered list of tables plus an optional error reported by
/// the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub tables: Vec<Table>,
    pub error: Option<String>,
}

impl QueryResult {
    /// Build a result, ordering the tables by their tag set.
    pub fn new(mut tables: Vec<Table>) -> Self {
        tables.sort_by_cached_key(Table::tag_string);
        Self {
            tables,
            error: None,
        }
    }

    /// A result is empty when it has no tables or its first table has no rows.
    pub fn is_empty(&self) -> bool {
        self.tables.first().is_none_or(|t| t.rows.is_empty())
    }

    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    /// The column names of the first table.
    pub fn columns(&self) -> &[String] {
        self.tables.first().map_or(&[], |t| t.columns.as_slice())
    }

    /// The measurement name of the first table.
    pub fn measurement(&self) -> Option<&str> {
        self.tables.first().map(|t| t.name.as_str())
    }

    /// The `[first, last]` timestamps across all tables: the minimum first-row timestamp and
    /// the maximum last-row timestamp. `None` if no table has a timestamped row.
    pub fn time_range(&self) -> Option<(i64, i64)> {
        self.tables
            .iter()
            .filter_map(Table::time_range)
            .reduce(|(s1, e1), (s2, e2)| (s1.min(s2), e1.max(e2)))
    }

    /// Keep only the rows with a timestamp in `[start, end]`, dropping tables left without rows.
    pub fn slice_time(mut self, start: i64, end: i64) -> Self {
        for table in &mut self.tables {
            table
                .rows
                .retain(|row| Table::row_timestamp(row).is_some_and(|t| t >= start && t <= end));
        }
        self.tables.retain(|t| !t.rows.is_empty());
        self
    }

    /// Drop every tag whose key is not in `keys`, reordering tables by their new tag sets.
    pub fn restrict_tags<S: AsRef<str>>(self, keys: &[S]) -> Self {
        let tables = self
            .tables
            .into_iter()
            .map(|mut t| {
                t.tags
                    .retain(|k, _| keys.iter().any(|key| key.as_ref() == k));
                t
            })
            .collect();
        Self {
            error: self.error,
            ..Self::new(tables)
        }
    }

    /// Parse the JSON body returned by the InfluxDB 1.x `/query` endpoint.
    ///
    /// Only the first statement result is used.
    pub fn from_influx_json(body: &str) -> Result<Self, serde_json::Error> {
        let response: QueryResponse = serde_json::from_str(body)?;
        Ok(response
            .results
            .into_iter()
            .next()
            .map(|r| Self {
                error: r.error,
                ..Self::new(r.series)
            })
            .unwrap_or_default())
    }

    /// Render the result in the InfluxDB 1.x `/query` JSON shape.
    pub fn to_influx_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&QueryResponse {
            results: vec![StatementResult {
                statement_id: 0,
                series: self.tables.clone(),
                error: self.error.clone(),
            }],
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StatementResult {
    #[serde(default)]
    statement_id: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    series: Vec<Table>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table(tag: Option<&str>, rows: &[(i64, f64)]) -> Table {
        let mut t = Table::new("h2o_feet").with_columns(["time", "water_level"]);
        if let Some(tag) = tag {
            t = t.with_tag("location", tag);
        }
        for (ts, v) in rows {
            t = t.with_row(vec![Value::Int64(*ts), Value::Float64(*v)]);
        }
        t
    }

    #[test]
    fn test_datatype() {
        assert_eq!("float64".parse::<DataType>().unwrap(), DataType::Float64);
        assert_eq!(DataType::Bool.to_string(), "bool");
        assert!("float".parse::<DataType>().is_err());
        assert_eq!(DataType::from_field_type("float"), Some(DataType::Float64));
        assert_eq!(DataType::from_field_type("unsigned"), Some(DataType::Int64));
        assert_eq!(DataType::from_field_type("geo"), None);
    }

    #[test]
    fn test_tables_sorted_by_tag_set() {
        let result = QueryResult::new(vec![
            table(Some("santa_monica"), &[(1, 1.0)]),
            table(Some("coyote_creek"), &[(1, 2.0)]),
        ]);
        assert_eq!(result.tables[0].tag_string(), "location=coyote_creek");
        assert_eq!(result.tables[1].tag_string(), "location=santa_monica");
    }

    #[test]
    fn test_is_empty() {
        assert!(QueryResult::default().is_empty());
        assert!(QueryResult::new(vec![table(None, &[])]).is_empty());
        assert!(!QueryResult::new(vec![table(None, &[(1, 1.0)])]).is_empty());
    }

    #[test]
    fn test_time_range() {
        let result = QueryResult::new(vec![
            table(Some("a"), &[(10, 1.0), (20, 1.0)]),
            table(Some("b"), &[(5, 1.0), (15, 1.0)]),
            table(Some("c"), &[]),
        ]);
        assert_eq!(result.time_range(), Some((5, 20)));
        assert_eq!(QueryResult::default().time_range(), None);
    }

    #[test]
    fn test_slice_time() {
        let result = QueryResult::new(vec![
            table(Some("a"), &[(10, 1.0), (20, 2.0), (30, 3.0)]),
            table(Some("b"), &[(40, 4.0)]),
        ])
        .slice_time(15, 30);
        assert_eq!(result, QueryResult::new(vec![table(Some("a"), &[(20, 2.0), (30, 3.0)])]));
    }

    #[test]
    fn test_restrict_tags() {
        let t = Table::new("h2o")
            .with_tag("location", "a")
            .with_tag("randtag", "1")
            .with_columns(["time", "v"]);
        let result = QueryResult::new(vec![t]).restrict_tags(&["location"]);
        assert_eq!(result.tables[0].tag_string(), "location=a");

        let result = result.restrict_tags::<&str>(&[]);
        assert_eq!(result.tables[0].tag_string(), "");
    }

    #[test]
    fn test_value_timestamp() {
        assert_eq!(Value::Int64(5).timestamp_nanos(), Some(5));
        assert_eq!(Value::Float64(5.0).timestamp_nanos(), Some(5));
        assert_eq!(
            Value::from("2019-08-18T00:00:00Z").timestamp_nanos(),
            Some(1_566_086_400_000_000_000)
        );
        assert_eq!(Value::Bool(true).timestamp_nanos(), None);
        assert_eq!(Value::Null.timestamp_nanos(), None);
    }

    #[test]
    fn test_influx_json() {
        let body = r#"{
            "results": [{
                "statement_id": 0,
                "series": [{
                    "name": "h2o_feet",
                    "tags": {"location": "santa_monica"},
                    "columns": ["time", "water_level", "level description", "ok"],
                    "values": [
                        [1566086400000000000, 8.12, "between 6 and 9 feet", true],
                        [1566086760000000000, 8.005, null, false]
                    ]
                }, {
                    "name": "h2o_feet",
                    "tags": {"location": "coyote_creek"},
                    "columns": ["time", "water_level", "level description", "ok"],
                    "values": [[1566086400000000000, 2, "below 3 feet", true]]
                }]
            }]
        }"#;

        let result = QueryResult::from_influx_json(body).unwrap();
        assert_eq!(result.num_tables(), 2);
        assert_eq!(result.tables[0].tag_string(), "location=coyote_creek");
        assert_eq!(
            result.tables[1].rows[1],
            vec![
                Value::Int64(1_566_086_760_000_000_000),
                Value::Float64(8.005),
                Value::Null,
                Value::Bool(false),
            ]
        );
        assert_eq!(result.tables[0].rows[0][1], Value::Int64(2));

        let round_trip = QueryResult::from_influx_json(&result.to_influx_json().unwrap()).unwrap();
        assert_eq!(round_trip, result);
    }

    #[test]
    fn test_influx_json_error() {
        let result =
            QueryResult::from_influx_json(r#"{"results":[{"statement_id":0,"error":"database not found: x"}]}"#)
                .unwrap();
        assert!(result.is_empty());
        assert_eq!(result.error.as_deref(), Some("database not found: x"));

        let result = QueryResult::from_influx_json(r#"{"results":[{"statement_id":0}]}"#).unwrap();
        assert_eq!(result, QueryResult::default());
    }
}
