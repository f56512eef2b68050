//! Combine time-adjacent query results into one.
//!
//! Results produced for neighbouring time windows of the same query are merged table by table:
//! tables with the same tag set have their rows concatenated in time order, tables present on
//! only one side pass through. Two results are only merged if the gap between them is within a
//! [`Tolerance`].

use std::collections::BTreeMap;

use tracing::debug;

use crate::model::{QueryResult, Table};
use crate::time::{Precision, format_duration};

/// The display form of the tag set of a table without tags.
pub const EMPTY_TAG: &str = "empty tag";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("cannot merge results of measurement {earlier:?} with results of {later:?}")]
    MeasurementMismatch { earlier: String, later: String },

    #[error("cannot merge results with columns {earlier:?} and {later:?}")]
    ColumnMismatch {
        earlier: Vec<String>,
        later: Vec<String>,
    },
}

/// The largest gap, in nanoseconds, between two results that are still merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tolerance(i64);

impl Tolerance {
    pub fn from_nanos(nanos: i64) -> Self {
        Self(nanos.max(0))
    }

    pub fn as_nanos(self) -> i64 {
        self.0
    }

    fn admits(self, end: i64, start: i64) -> bool {
        end <= start && start.checked_sub(end).is_some_and(|gap| gap <= self.0)
    }
}

impl From<Precision> for Tolerance {
    fn from(precision: Precision) -> Self {
        Self(precision.as_nanos())
    }
}

impl std::fmt::Display for Tolerance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_duration(self.0))
    }
}

/// A result together with the inclusive time window it covers.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub start: i64,
    pub end: i64,
    pub result: QueryResult,
}

impl Fragment {
    pub fn new(start: i64, end: i64, result: QueryResult) -> Self {
        Self { start, end, result }
    }

    /// A fragment spanning the first to last row timestamps of `result`, or `None` if the
    /// result has no timestamped rows.
    pub fn from_rows(result: QueryResult) -> Option<Self> {
        let (start, end) = result.time_range()?;
        Some(Self::new(start, end, result))
    }

    /// Merge `self` with `other` if one ends within `tolerance` of where the other starts.
    fn merge(&self, other: &Self, tolerance: Tolerance) -> Option<Self> {
        let (earlier, later) = if tolerance.admits(self.end, other.start) {
            (self, other)
        } else if tolerance.admits(other.end, self.start) {
            (other, self)
        } else {
            debug!(
                start = self.start,
                end = self.end,
                other_start = other.start,
                other_end = other.end,
                %tolerance,
                "results are not adjacent"
            );
            return None;
        };

        match merge_result_tables(&earlier.result, &later.result) {
            Ok(result) => Some(Self::new(
                earlier.start,
                earlier.end.max(later.end),
                result,
            )),
            Err(e) => {
                debug!(error = %e, "passing through incompatible results");
                None
            }
        }
    }
}

/// Merge adjacent fragments, returning the merged results in time order.
///
/// Empty fragments are dropped. The rest are ordered by their windows and reduced left to right:
/// each fragment is merged into the accumulated result if it is adjacent within `tolerance` and
/// compatible, otherwise the accumulated result is emitted and the fragment starts a new one.
pub fn merge_fragments(
    fragments: impl IntoIterator<Item = Fragment>,
    tolerance: Tolerance,
) -> Vec<QueryResult> {
    let mut fragments: Vec<_> = fragments
        .into_iter()
        .filter(|f| !f.result.is_empty())
        .collect();
    fragments.sort_by_key(|f| (f.start, f.end));

    let mut merged = Vec::with_capacity(fragments.len());
    let mut fragments = fragments.into_iter();
    let Some(mut acc) = fragments.next() else {
        return merged;
    };
    for fragment in fragments {
        match acc.merge(&fragment, tolerance) {
            Some(m) => acc = m,
            None => {
                merged.push(acc.result);
                acc = fragment;
            }
        }
    }
    merged.push(acc.result);

    debug!(results = merged.len(), %tolerance, "merged results");
    merged
}

/// Merge results spanning the time range of their rows.
pub fn merge_results(
    results: impl IntoIterator<Item = QueryResult>,
    tolerance: Tolerance,
) -> Vec<QueryResult> {
    merge_fragments(results.into_iter().filter_map(Fragment::from_rows), tolerance)
}

fn tag_display(table: &Table) -> String {
    match table.tag_string() {
        tags if tags.is_empty() => EMPTY_TAG.to_string(),
        tags => tags,
    }
}

/// Align the tables of `earlier` and `later` by tag set and concatenate their rows.
///
/// `earlier` must cover a time window before `later`. Tables present in only one result pass
/// through, and a single tagless table on either side absorbs the other side's single table.
pub fn merge_result_tables(
    earlier: &QueryResult,
    later: &QueryResult,
) -> Result<QueryResult, MergeError> {
    if let (Some(e), Some(l)) = (earlier.measurement(), later.measurement()) {
        if e != l {
            return Err(MergeError::MeasurementMismatch {
                earlier: e.to_string(),
                later: l.to_string(),
            });
        }
    }
    if !earlier.tables.is_empty()
        && !later.tables.is_empty()
        && earlier.columns() != later.columns()
    {
        return Err(MergeError::ColumnMismatch {
            earlier: earlier.columns().to_vec(),
            later: later.columns().to_vec(),
        });
    }

    let error = earlier.error.clone().or_else(|| later.error.clone());

    if let ([e], [l]) = (earlier.tables.as_slice(), later.tables.as_slice()) {
        if e.tags.is_empty() || l.tags.is_empty() {
            let mut table = e.clone();
            table.rows.extend(l.rows.iter().cloned());
            return Ok(QueryResult {
                tables: vec![table],
                error,
            });
        }
    }

    let mut aligned: BTreeMap<String, Table> = earlier
        .tables
        .iter()
        .map(|t| (t.tag_string(), t.clone()))
        .collect();
    for table in &later.tables {
        match aligned.get_mut(&table.tag_string()) {
            Some(existing) => {
                debug!(tags = %tag_display(table), rows = table.rows.len(), "appending rows");
                existing.rows.extend(table.rows.iter().cloned());
            }
            None => {
                aligned.insert(table.tag_string(), table.clone());
            }
        }
    }

    Ok(QueryResult {
        tables: aligned.into_values().collect(),
        error,
    })
}
