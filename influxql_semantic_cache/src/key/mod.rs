//! Semantic cache keys.
//!
//! A key describes *what* a cached result contains rather than the query text that produced
//! it, so that logically equal queries map to the same entry. It has four sections joined by
//! `#`:
//!
//! ```text
//! {(m.tag=value,...)(...)}#{column[type],...}#{(operand<op>literal[type])...}#{function,interval}
//!  \________ SM _______/    \______ SF _____/  \___________ SP ___________/  \______ SG _____/
//! ```
//!
//! * `SM` holds one group per table with the tag assignments identifying it, `(m.empty)` for a
//!   table without tags, or `{empty}` for an empty result.
//! * `SF` lists the columns after the timestamp with their data types, or `empty`.
//! * `SP` lists the field (non-tag) predicates, or `{empty}`.
//! * `SG` holds the aggregation and `GROUP BY time()` interval, each `empty` when absent.
//!
//! Names and values are backslash escaped so that the text can be parsed back with
//! [`SemanticKey::from_str`].

use std::fmt::{Display, Formatter, Write};
use std::str::FromStr;

use crate::catalog::Catalog;
use crate::decompose::{Decomposition, QueryContext};
use crate::model::{DataType, QueryResult, Table, Value};
use crate::parser::ComparisonOperator;

use self::text::{
    Position, braced, escape, find_operator, find_unescaped, rfind_unescaped, split_groups,
    split_unescaped, unescape,
};

pub(crate) mod text;

/// Placeholder for an absent section or component.
pub const EMPTY: &str = "empty";

/// Default upper bound on the length of a rendered key, matching memcached.
pub const DEFAULT_MAX_KEY_LENGTH: usize = 450;

#[derive(Debug, Clone, Copy, thiserror::Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("semantic key is {len} bytes, exceeding the limit of {max}")]
    TooLong { len: usize, max: usize },

    #[error("malformed semantic key: {reason}")]
    Malformed { reason: &'static str },
}

fn malformed(reason: &'static str) -> KeyError {
    KeyError::Malformed { reason }
}

/// One `measurement.tag<op>value` assignment of an `SM` group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagEntry {
    pub tag: String,
    pub operator: ComparisonOperator,
    pub value: String,
}

impl TagEntry {
    pub fn new(tag: impl Into<String>, operator: ComparisonOperator, value: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            operator,
            value: value.into(),
        }
    }

    fn render(&self, measurement: &str) -> String {
        format!(
            "{}.{}{}{}",
            escape(measurement, Position::Measurement),
            escape(&self.tag, Position::Name),
            self.operator,
            escape(&self.value, Position::Name)
        )
    }
}

/// The tag assignments of one table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Segment {
    pub measurement: String,
    /// Entries sorted by their rendered text.
    pub entries: Vec<TagEntry>,
}

impl Segment {
    /// Build a segment, sorting and deduplicating `entries`.
    pub fn new(measurement: impl Into<String>, entries: Vec<TagEntry>) -> Self {
        let measurement = measurement.into();
        let mut rendered: Vec<_> = entries
            .into_iter()
            .map(|e| (e.render(&measurement), e))
            .collect();
        rendered.sort_by(|a, b| a.0.cmp(&b.0));
        rendered.dedup_by(|a, b| a.0 == b.0);

        Self {
            entries: rendered.into_iter().map(|(_, e)| e).collect(),
            measurement,
        }
    }

    /// The `tag=value` equality assignments, which identify the series of a decoded table.
    pub fn equality_tags(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter(|e| e.operator == ComparisonOperator::Eq)
            .map(|e| (e.tag.as_str(), e.value.as_str()))
    }
}

impl Display for Segment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_char('(')?;
        if self.entries.is_empty() {
            write!(
                f,
                "{}.{EMPTY}",
                escape(&self.measurement, Position::Measurement)
            )?;
        }
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_char(',')?;
            }
            f.write_str(&entry.render(&self.measurement))?;
        }
        f.write_char(')')
    }
}

/// A column after the timestamp and its data type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnSpec {
    pub name: String,
    pub datatype: DataType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Self {
            name: name.into(),
            datatype,
        }
    }
}

impl Display for ColumnSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", escape(&self.name, Position::Name), self.datatype)
    }
}

/// A field predicate as recorded in `SP`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPredicate {
    pub operand: String,
    pub operator: ComparisonOperator,
    pub literal: String,
    pub datatype: DataType,
}

impl Display for KeyPredicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}{}{}[{}])",
            escape(&self.operand, Position::Name),
            self.operator,
            escape(&self.literal, Position::Name),
            self.datatype
        )
    }
}

/// A parsed or built semantic key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SemanticKey {
    /// One segment per table; empty for an empty result.
    pub segments: Vec<Segment>,
    pub fields: Vec<ColumnSpec>,
    pub predicates: Vec<KeyPredicate>,
    pub aggregation: Option<String>,
    pub interval: Option<String>,
}

impl SemanticKey {
    /// The measurement named by the first segment.
    pub fn measurement(&self) -> Option<&str> {
        self.segments.first().map(|s| s.measurement.as_str())
    }

    /// The data types of every column of a table under this key, timestamp first.
    pub fn column_types(&self) -> Vec<DataType> {
        std::iter::once(DataType::Int64)
            .chain(self.fields.iter().map(|c| c.datatype))
            .collect()
    }

    /// The column names of a table under this key, timestamp first.
    pub fn column_names(&self) -> Vec<String> {
        std::iter::once("time".to_string())
            .chain(self.fields.iter().map(|c| c.name.clone()))
            .collect()
    }

    /// A copy of this key describing a single table.
    pub fn with_segment(&self, segment: Segment) -> Self {
        Self {
            segments: vec![segment],
            ..self.clone()
        }
    }

    /// The `SM` section.
    pub fn segments_text(&self) -> String {
        if self.segments.is_empty() {
            return format!("{{{EMPTY}}}");
        }
        let mut out = String::from("{");
        for segment in &self.segments {
            out.push_str(&segment.to_string());
        }
        out.push('}');
        out
    }

    /// Render the key, failing if it is longer than `max` bytes.
    pub fn render_checked(&self, max: usize) -> Result<String, KeyError> {
        let text = self.to_string();
        if text.len() > max {
            return Err(KeyError::TooLong {
                len: text.len(),
                max,
            });
        }
        Ok(text)
    }
}

impl Display for SemanticKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments_text())?;

        f.write_str("#{")?;
        if self.fields.is_empty() {
            f.write_str(EMPTY)?;
        }
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_char(',')?;
            }
            write!(f, "{field}")?;
        }

        f.write_str("}#{")?;
        if self.predicates.is_empty() {
            f.write_str(EMPTY)?;
        }
        for predicate in &self.predicates {
            write!(f, "{predicate}")?;
        }

        let component = |v: &Option<String>| {
            v.as_deref()
                .map_or_else(|| EMPTY.to_string(), |v| escape(v, Position::Name).into_owned())
        };
        write!(
            f,
            "}}#{{{},{}}}",
            component(&self.aggregation),
            component(&self.interval)
        )
    }
}

fn parse_segment(group: &str) -> Result<Segment, KeyError> {
    let mut measurement = None;
    let mut entries = Vec::new();

    for entry in split_unescaped(group, ',') {
        let dot = find_unescaped(entry, |c| c == '.')
            .ok_or_else(|| malformed("tag assignment without measurement"))?;
        measurement.get_or_insert_with(|| unescape(&entry[..dot]));

        let rest = &entry[dot + 1..];
        if rest == EMPTY {
            continue;
        }
        let op_at = find_operator(rest).ok_or_else(|| malformed("tag assignment without operator"))?;
        let (operator, len) = ComparisonOperator::match_prefix(&rest[op_at..])
            .ok_or_else(|| malformed("unknown tag assignment operator"))?;
        entries.push(TagEntry {
            tag: unescape(&rest[..op_at]),
            operator,
            value: unescape(&rest[op_at + len..]),
        });
    }

    let measurement = measurement.ok_or_else(|| malformed("empty tag group"))?;
    Ok(Segment {
        measurement,
        entries,
    })
}

fn parse_segments(section: &str) -> Result<Vec<Segment>, KeyError> {
    let inner = braced(section).ok_or_else(|| malformed("SM section is not braced"))?;
    if inner == EMPTY {
        return Ok(Vec::new());
    }
    split_groups(inner)
        .ok_or_else(|| malformed("SM section is not a list of groups"))?
        .into_iter()
        .map(parse_segment)
        .collect()
}

/// Split `name[type]` into its unescaped name and data type.
fn parse_typed(s: &str) -> Result<(String, DataType), KeyError> {
    let open = rfind_unescaped(s, |c| c == '[').ok_or_else(|| malformed("missing data type"))?;
    let datatype = s[open + 1..]
        .strip_suffix(']')
        .ok_or_else(|| malformed("unterminated data type"))?
        .parse()
        .map_err(|_| malformed("unknown data type"))?;
    Ok((unescape(&s[..open]), datatype))
}

fn parse_fields(section: &str) -> Result<Vec<ColumnSpec>, KeyError> {
    let inner = braced(section).ok_or_else(|| malformed("SF section is not braced"))?;
    if inner == EMPTY {
        return Ok(Vec::new());
    }
    split_unescaped(inner, ',')
        .into_iter()
        .map(|c| parse_typed(c).map(|(name, datatype)| ColumnSpec { name, datatype }))
        .collect()
}

fn parse_predicates(section: &str) -> Result<Vec<KeyPredicate>, KeyError> {
    let inner = braced(section).ok_or_else(|| malformed("SP section is not braced"))?;
    if inner == EMPTY {
        return Ok(Vec::new());
    }
    split_groups(inner)
        .ok_or_else(|| malformed("SP section is not a list of groups"))?
        .into_iter()
        .map(|group| {
            let op_at =
                find_operator(group).ok_or_else(|| malformed("predicate without operator"))?;
            let (operator, len) = ComparisonOperator::match_prefix(&group[op_at..])
                .ok_or_else(|| malformed("unknown predicate operator"))?;
            let (literal, datatype) = parse_typed(&group[op_at + len..])?;
            Ok(KeyPredicate {
                operand: unescape(&group[..op_at]),
                operator,
                literal,
                datatype,
            })
        })
        .collect()
}

fn parse_group(section: &str) -> Result<(Option<String>, Option<String>), KeyError> {
    let inner = braced(section).ok_or_else(|| malformed("SG section is not braced"))?;
    let component = |s: &str| (s != EMPTY).then(|| unescape(s));
    match split_unescaped(inner, ',').as_slice() {
        [aggregation, interval] => Ok((component(aggregation), component(interval))),
        _ => Err(malformed("SG section must have two components")),
    }
}

impl FromStr for SemanticKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let sections = split_unescaped(s, '#');
        let [sm, sf, sp, sg] = sections.as_slice() else {
            return Err(malformed("expected four sections"));
        };
        let (aggregation, interval) = parse_group(sg)?;

        Ok(Self {
            segments: parse_segments(sm)?,
            fields: parse_fields(sf)?,
            predicates: parse_predicates(sp)?,
            aggregation,
            interval,
        })
    }
}

/// Build the `SM` segment of one table.
///
/// The table's own tags restricted to the `GROUP BY` tags are combined with every tag
/// predicate on a tag not covered by the `GROUP BY`.
pub fn table_segment(decomposition: &Decomposition, table: &Table) -> Segment {
    let measurement = if table.name.is_empty() {
        decomposition.measurement.as_str()
    } else {
        table.name.as_str()
    };

    let grouped = table
        .tags
        .iter()
        .filter(|(k, _)| decomposition.group_by_tags.contains(k))
        .map(|(k, v)| TagEntry::new(k.as_str(), ComparisonOperator::Eq, v.as_str()));
    let predicated = decomposition
        .tag_predicates
        .iter()
        .filter(|p| !decomposition.group_by_tags.contains(&p.operand))
        .map(|p| TagEntry::new(p.operand.as_str(), p.operator, p.value.as_str()));

    Segment::new(measurement, grouped.chain(predicated).collect())
}

/// Build the `SM` segments of a whole result.
pub fn semantic_segments(decomposition: &Decomposition, result: &QueryResult) -> Vec<Segment> {
    if result.is_empty() {
        return Vec::new();
    }

    let mut segments: Vec<_> = result
        .tables
        .iter()
        .map(|t| table_segment(decomposition, t))
        .collect();
    if decomposition.group_by_tags.is_empty() {
        // ungrouped tables share one aggregate assignment
        segments.dedup();
    }
    segments
}

const INTEGER_AGGREGATES: &[&str] = &["count"];
const FLOAT_AGGREGATES: &[&str] = &[
    "mean",
    "median",
    "stddev",
    "integral",
    "derivative",
    "non_negative_derivative",
    "moving_average",
];

fn observed_type(result: &QueryResult, column: usize) -> Option<DataType> {
    result
        .tables
        .iter()
        .flat_map(|t| t.rows.iter())
        .filter_map(|row| row.get(column))
        .find_map(Value::datatype)
}

fn column_type(
    decomposition: &Decomposition,
    catalog: &Catalog,
    result: &QueryResult,
    column: usize,
    name: &str,
) -> DataType {
    let measurement = &decomposition.measurement;
    let declared = match decomposition.aggregation.as_deref() {
        Some(f) if INTEGER_AGGREGATES.contains(&f) => Some(DataType::Int64),
        Some(f) if FLOAT_AGGREGATES.contains(&f) => Some(DataType::Float64),
        Some(_) if decomposition.wildcard => decomposition
            .result_fields(result)
            .get(column - 1)
            .and_then(|field| catalog.field_type(measurement, field)),
        Some(_) => decomposition
            .fields
            .get(column - 1)
            .or_else(|| decomposition.fields.first())
            .and_then(|field| catalog.field_type(measurement, field)),
        None if catalog.is_tag(measurement, name) => Some(DataType::String),
        None => catalog.field_type(measurement, name),
    };

    declared
        .or_else(|| observed_type(result, column))
        .unwrap_or(DataType::Float64)
}

/// Build the `SF` section: every column after the timestamp with its resolved type.
pub fn semantic_fields(
    decomposition: &Decomposition,
    result: &QueryResult,
    ctx: &QueryContext,
) -> Vec<ColumnSpec> {
    let catalog = ctx.catalog();
    if result.tables.is_empty() {
        return decomposition
            .fields
            .iter()
            .map(|name| {
                let datatype = catalog
                    .field_type(&decomposition.measurement, name)
                    .unwrap_or(DataType::Float64);
                ColumnSpec::new(name.as_str(), datatype)
            })
            .collect();
    }

    result
        .columns()
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, name)| {
            ColumnSpec::new(
                name.as_str(),
                column_type(decomposition, catalog, result, i, name),
            )
        })
        .collect()
}

/// Build the `SP` section, sorted and deduplicated.
pub fn semantic_predicates(decomposition: &Decomposition) -> Vec<KeyPredicate> {
    let mut predicates: Vec<_> = decomposition
        .field_predicates
        .iter()
        .map(|p| KeyPredicate {
            operand: p.operand.clone(),
            operator: p.operator,
            literal: p.literal.clone(),
            datatype: p.datatype,
        })
        .map(|p| (p.to_string(), p))
        .collect();
    predicates.sort_by(|a, b| a.0.cmp(&b.0));
    predicates.dedup_by(|a, b| a.0 == b.0);
    predicates.into_iter().map(|(_, p)| p).collect()
}

/// Build the semantic key of a whole result.
pub fn build_key(
    decomposition: &Decomposition,
    result: &QueryResult,
    ctx: &QueryContext,
) -> SemanticKey {
    SemanticKey {
        segments: semantic_segments(decomposition, result),
        fields: semantic_fields(decomposition, result, ctx),
        predicates: semantic_predicates(decomposition),
        aggregation: decomposition.aggregation.clone(),
        interval: decomposition.group_by_interval.clone(),
    }
}

/// Build one key per table of `result`, in table order. An empty result yields the single
/// whole-result key.
pub fn build_table_keys(
    decomposition: &Decomposition,
    result: &QueryResult,
    ctx: &QueryContext,
) -> Vec<SemanticKey> {
    let key = build_key(decomposition, result, ctx);
    if result.is_empty() {
        return vec![key];
    }
    result
        .tables
        .iter()
        .map(|t| key.with_segment(table_segment(decomposition, t)))
        .collect()
}
