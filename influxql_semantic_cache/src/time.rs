//! Time handling shared by the decomposer, the merge engine and the codec.
//!
//! All timestamps inside this crate are signed 64-bit nanosecond offsets from the Unix epoch.
//! InfluxQL expresses durations with a small set of unit suffixes, which are parsed here and
//! rendered back in their shortest form so that `time(60m)` and `time(1h)` produce the same
//! semantic key.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat};
use serde::{Deserialize, Serialize};

pub const NANOS_PER_MICRO: i64 = 1_000;
pub const NANOS_PER_MILLI: i64 = 1_000 * NANOS_PER_MICRO;
pub const NANOS_PER_SECOND: i64 = 1_000 * NANOS_PER_MILLI;
pub const NANOS_PER_MINUTE: i64 = 60 * NANOS_PER_SECOND;
pub const NANOS_PER_HOUR: i64 = 60 * NANOS_PER_MINUTE;
pub const NANOS_PER_DAY: i64 = 24 * NANOS_PER_HOUR;
pub const NANOS_PER_WEEK: i64 = 7 * NANOS_PER_DAY;

/// The precision of a timestamp
///
/// Used both for the epoch precision requested from the query engine and as the label of a
/// merge tolerance window.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
}

impl Precision {
    /// The fixed duration, in nanoseconds, of one unit of this precision.
    pub fn as_nanos(self) -> i64 {
        match self {
            Self::Nanosecond => 1,
            Self::Microsecond => NANOS_PER_MICRO,
            Self::Millisecond => NANOS_PER_MILLI,
            Self::Second => NANOS_PER_SECOND,
            Self::Minute => NANOS_PER_MINUTE,
            Self::Hour => NANOS_PER_HOUR,
        }
    }

    /// The short label used by the InfluxDB HTTP API `epoch` parameter.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nanosecond => "ns",
            Self::Microsecond => "u",
            Self::Millisecond => "ms",
            Self::Second => "s",
            Self::Minute => "m",
            Self::Hour => "h",
        }
    }
}

impl Display for Precision {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let p = match s {
            "n" | "ns" => Self::Nanosecond,
            "u" | "us" | "µ" | "µs" => Self::Microsecond,
            "ms" => Self::Millisecond,
            "s" => Self::Second,
            "m" => Self::Minute,
            "h" => Self::Hour,
            _ => return Err(format!("unrecognized precision unit: {s}")),
        };
        Ok(p)
    }
}

/// An inclusive `[start, end]` window in nanoseconds where either bound may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    /// Returns both bounds when the range is closed on both sides.
    pub fn bounds(&self) -> Option<(i64, i64)> {
        Some((self.start?, self.end?))
    }

    /// Tighten the lower bound, keeping the greatest lower bound seen so far.
    pub fn restrict_start(&mut self, start: i64) {
        self.start = Some(self.start.map_or(start, |s| s.max(start)));
    }

    /// Tighten the upper bound, keeping the least upper bound seen so far.
    pub fn restrict_end(&mut self, end: i64) {
        self.end = Some(self.end.map_or(end, |e| e.min(end)));
    }
}

impl Display for TimeRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.start {
            Some(s) => write!(f, "[{s},")?,
            None => f.write_str("[empty,")?,
        }
        match self.end {
            Some(e) => write!(f, "{e}]"),
            None => f.write_str("empty]"),
        }
    }
}

/// Unit suffixes accepted in InfluxQL duration literals, longest first so that `ms` is tried
/// before `m`.
const DURATION_UNITS: &[(&str, i64)] = &[
    ("ns", 1),
    ("µs", NANOS_PER_MICRO),
    ("us", NANOS_PER_MICRO),
    ("ms", NANOS_PER_MILLI),
    ("u", NANOS_PER_MICRO),
    ("µ", NANOS_PER_MICRO),
    ("s", NANOS_PER_SECOND),
    ("m", NANOS_PER_MINUTE),
    ("h", NANOS_PER_HOUR),
    ("d", NANOS_PER_DAY),
    ("w", NANOS_PER_WEEK),
];

/// Returns the nanosecond multiplier of an InfluxQL duration unit.
pub fn duration_unit(unit: &str) -> Option<i64> {
    DURATION_UNITS
        .iter()
        .find_map(|(u, n)| (*u == unit).then_some(*n))
}

/// Parse an InfluxQL duration such as `12m`, `1h30m` or `-5s` into nanoseconds.
pub fn parse_duration(s: &str) -> Option<i64> {
    let (negative, mut rest) = match s.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, s),
    };
    if rest.is_empty() {
        return None;
    }

    let mut total: i64 = 0;
    while !rest.is_empty() {
        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return None;
        }
        let value: i64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let (unit, multiplier) = DURATION_UNITS
            .iter()
            .find(|(u, _)| rest.starts_with(u))?;
        rest = &rest[unit.len()..];

        total = total.checked_add(value.checked_mul(*multiplier)?)?;
    }

    Some(if negative { -total } else { total })
}

/// Render a duration using the largest unit that divides it exactly.
///
/// ```
/// use influxql_semantic_cache::time::{format_duration, NANOS_PER_MINUTE};
/// assert_eq!(format_duration(12 * NANOS_PER_MINUTE), "12m");
/// assert_eq!(format_duration(60 * NANOS_PER_MINUTE), "1h");
/// ```
pub fn format_duration(nanos: i64) -> String {
    const UNITS: &[(&str, i64)] = &[
        ("w", NANOS_PER_WEEK),
        ("d", NANOS_PER_DAY),
        ("h", NANOS_PER_HOUR),
        ("m", NANOS_PER_MINUTE),
        ("s", NANOS_PER_SECOND),
        ("ms", NANOS_PER_MILLI),
        ("u", NANOS_PER_MICRO),
    ];

    if nanos == 0 {
        return "0s".to_string();
    }
    for (unit, n) in UNITS {
        if nanos % n == 0 {
            return format!("{}{unit}", nanos / n);
        }
    }
    format!("{nanos}ns")
}

/// Parse a timestamp literal into nanoseconds since the epoch.
///
/// Accepts RFC3339 (`2019-08-18T00:00:00Z`), the space separated form InfluxQL also allows
/// (`2019-08-18 00:00:00`), bare dates (`2019-08-18`) and integer nanosecond epochs. Timestamps
/// without an offset are interpreted as UTC.
pub fn parse_timestamp(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(ns) = s.parse::<i64>() {
        return Some(ns);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.timestamp_nanos_opt();
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return dt.and_utc().timestamp_nanos_opt();
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|dt| dt.and_utc().timestamp_nanos_opt())
}

/// Render a nanosecond timestamp as RFC3339 in UTC.
pub fn format_timestamp(nanos: i64) -> String {
    DateTime::from_timestamp_nanos(nanos).to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
