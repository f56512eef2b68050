//! Decompose an InfluxQL `SELECT` into the semantic parts the cache reasons about.
//!
//! A [`Decomposition`] records the measurement, the projected fields and aggregation, the
//! tag and field predicates, the requested time window and the `GROUP BY` dimensions. The
//! parsed statement is retained so that the query can be re-issued for a different time window
//! with [`Decomposition::rewrite_time_range`].

use std::fmt::{Display, Formatter};
use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::debug;

use crate::catalog::Catalog;
use crate::model::{DataType, QueryResult};
use crate::parser::{
    Comparison, ComparisonOperator, Condition, ConditionalExpression, ConditionalOperator,
    Dimension, Expr, FieldExpr, FillClause, Literal, LogicalGroup, MeasurementName, Operand,
    OrderByClause, ParseError, SelectStatement, parse_select, walk_condition,
};
use crate::time::TimeRange;

/// Errors raised while decomposing a query.
#[derive(Debug, thiserror::Error)]
pub enum DecomposeError {
    #[error("query has no SELECT projection")]
    MissingProjection,

    #[error("unable to parse query: {source}")]
    Syntax {
        #[from]
        source: ParseError,
    },

    #[error("regular expression measurements are not supported: {regex}")]
    RegexMeasurement { regex: String },

    #[error("invalid time literal in condition: {text}")]
    InvalidTimeLiteral { text: String },
}

/// Everything outside the query text needed to decompose it.
#[derive(Debug, Clone)]
pub struct QueryContext {
    catalog: Arc<Catalog>,
    now: Option<i64>,
}

impl QueryContext {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog, now: None }
    }

    /// Pin the value of `now()` to a fixed nanosecond timestamp.
    pub fn with_now(mut self, now: i64) -> Self {
        self.now = Some(now);
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The current time in nanoseconds, used to evaluate `now()`.
    pub fn now_nanos(&self) -> i64 {
        self.now.unwrap_or_else(|| {
            chrono::Utc::now()
                .timestamp_nanos_opt()
                .unwrap_or(i64::MAX)
        })
    }
}

/// A non-time predicate of the `WHERE` clause.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Predicate {
    /// The identifier on the left hand side.
    pub operand: String,
    pub operator: ComparisonOperator,
    /// The normalized literal text: strings single-quoted, booleans lowercased.
    pub literal: String,
    /// The literal with any string quoting removed.
    pub value: String,
    pub datatype: DataType,
    pub group: LogicalGroup,
}

impl Predicate {
    fn new(comparison: &Comparison, group: LogicalGroup) -> Self {
        let Operand { text, expr } = &comparison.rhs;
        let (literal, value, datatype) = match expr {
            Expr::Literal(Literal::String(s)) => {
                (Literal::String(s.clone()).to_string(), s.clone(), DataType::String)
            }
            Expr::Literal(lit @ Literal::Regex(_)) => {
                (lit.to_string(), lit.to_string(), DataType::String)
            }
            Expr::Literal(Literal::Boolean(b)) => (b.to_string(), b.to_string(), DataType::Bool),
            Expr::Literal(Literal::Float(_)) => (text.clone(), text.clone(), DataType::Float64),
            Expr::Literal(Literal::Integer(_)) => (text.clone(), text.clone(), DataType::Int64),
            _ if text.contains('.') => (text.clone(), text.clone(), DataType::Float64),
            _ => (text.clone(), text.clone(), DataType::Int64),
        };

        Self {
            operand: comparison.lhs.as_str().to_string(),
            operator: comparison.op,
            literal,
            value,
            datatype,
            group,
        }
    }
}

impl Display for Predicate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}[{}]",
            self.operand, self.operator, self.literal, self.datatype
        )
    }
}

/// The semantic parts of a `SELECT` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct Decomposition {
    pub measurement: String,
    /// Field identifiers referenced by the projection, in order, excluding `time`.
    pub fields: Vec<String>,
    /// True if the projection contains `*`, in which case `fields` may be incomplete.
    pub wildcard: bool,
    /// The lowercased name of the first function in the projection.
    pub aggregation: Option<String>,
    pub tag_predicates: Vec<Predicate>,
    pub field_predicates: Vec<Predicate>,
    pub time_range: TimeRange,
    /// Tag keys of the `GROUP BY` clause, sorted and deduplicated.
    pub group_by_tags: Vec<String>,
    /// The `GROUP BY time()` interval in its shortest form, with any offset appended.
    pub group_by_interval: Option<String>,
    pub statement: SelectStatement,
    /// True if any comparison of the condition sits under an `OR`.
    disjunctive: bool,
    regex_dimension: bool,
}

impl Decomposition {
    /// Returns true if results of the query can be cached and merged by time.
    ///
    /// Row or series limits, descending order, time zones, regex dimensions and `OR`
    /// conditions change which rows a window returns, and an open time range has no window at
    /// all. The semantic key records neither the database and retention policy of the `FROM`
    /// clause nor the `fill()` option, so qualified measurements and fills other than the
    /// default are not cached either.
    pub fn is_cacheable(&self) -> bool {
        let stmt = &self.statement;
        stmt.from.database.is_none()
            && stmt.from.retention_policy.is_none()
            && matches!(stmt.fill, None | Some(FillClause::Null))
            && stmt.limit.is_none()
            && stmt.offset.is_none()
            && stmt.series_limit.is_none()
            && stmt.series_offset.is_none()
            && stmt.timezone.is_none()
            && stmt.order_by != Some(OrderByClause::Descending)
            && self.time_range.bounds().is_some()
            && !self.disjunctive
            && !self.regex_dimension
    }

    /// Render the query restricted to the inclusive window `[start, end]`, replacing any time
    /// bounds of the original condition.
    pub fn rewrite_time_range(&self, start: i64, end: i64) -> String {
        let time = |op, ts: i64| {
            ConditionalExpression::Comparison(Comparison {
                lhs: "time".into(),
                op,
                rhs: Operand::new(Expr::Literal(Literal::Integer(ts))),
            })
        };
        let window = ConditionalExpression::binary(
            time(ComparisonOperator::GtEq, start),
            ConditionalOperator::And,
            time(ComparisonOperator::LtEq, end),
        );

        let mut statement = self.statement.clone();
        statement.condition = Some(match self.condition_without_time() {
            Some(rest @ ConditionalExpression::Binary(_)) => ConditionalExpression::binary(
                ConditionalExpression::Grouped(Box::new(rest)),
                ConditionalOperator::And,
                window,
            ),
            Some(rest) => ConditionalExpression::binary(rest, ConditionalOperator::And, window),
            None => window,
        });
        statement.to_string()
    }

    /// The query text with all time bounds removed. Queries that differ only in their time
    /// window share a signature.
    pub fn signature(&self) -> String {
        let mut statement = self.statement.clone();
        statement.condition = self.condition_without_time();
        statement.to_string()
    }

    fn condition_without_time(&self) -> Option<ConditionalExpression> {
        self.statement
            .condition
            .as_ref()
            .and_then(|c| c.without_comparisons_on("time"))
    }

    /// The field names of `result`, for projections such as `MEAN(*)` whose fields are only
    /// known once the query has run.
    ///
    /// Columns after the timestamp are used with the `<function>_` prefix the engine adds for
    /// wildcard aggregates removed.
    pub fn result_fields(&self, result: &QueryResult) -> Vec<String> {
        let prefix = self.aggregation.as_ref().map(|a| format!("{a}_"));
        result
            .columns()
            .iter()
            .skip(1)
            .map(|c| match &prefix {
                Some(p) if self.wildcard => c.strip_prefix(p.as_str()).unwrap_or(c).to_string(),
                _ => c.clone(),
            })
            .collect()
    }
}

fn starts_with_select(query: &str) -> bool {
    query
        .trim_start()
        .get(..6)
        .is_some_and(|s| s.eq_ignore_ascii_case("select"))
}

/// Decompose `query` using the schema and clock of `ctx`.
pub fn decompose(query: &str, ctx: &QueryContext) -> Result<Decomposition, DecomposeError> {
    if !starts_with_select(query) {
        return Err(DecomposeError::MissingProjection);
    }
    let statement = parse_select(query)?;

    let measurement = match &statement.from.name {
        MeasurementName::Name(name) => name.as_str().to_string(),
        MeasurementName::Regex(re) => {
            return Err(DecomposeError::RegexMeasurement {
                regex: re.to_string(),
            });
        }
    };

    let mut aggregation = None;
    let mut wildcard = false;
    let mut fields: Vec<String> = Vec::new();
    for field in &statement.fields {
        if let FieldExpr::Call(call) = &field.expr {
            aggregation.get_or_insert_with(|| call.name.clone());
        }
        wildcard |= field.expr.has_wildcard();

        let mut refs = Vec::new();
        field.expr.var_refs(&mut refs);
        for name in refs {
            if !name.eq_ignore_ascii_case("time") && !fields.iter().any(|f| f == name.as_str()) {
                fields.push(name.as_str().to_string());
            }
        }
    }

    let mut time_range = TimeRange::default();
    let mut disjunctive = false;
    let mut tag_predicates = Vec::new();
    let mut field_predicates = Vec::new();
    if let Some(condition) = &statement.condition {
        let now = ctx.now_nanos();
        let res = walk_condition(condition, &mut |node| {
            let Condition::Comparison {
                comparison,
                group,
                disjunctive: under_or,
            } = node
            else {
                return ControlFlow::Continue(());
            };
            disjunctive |= under_or;

            if comparison.lhs.eq_ignore_ascii_case("time") {
                let Some(ts) = comparison.rhs.expr.eval_timestamp(now) else {
                    return ControlFlow::Break(DecomposeError::InvalidTimeLiteral {
                        text: comparison.rhs.text.clone(),
                    });
                };
                match comparison.op {
                    ComparisonOperator::GtEq => time_range.restrict_start(ts),
                    ComparisonOperator::Gt => time_range.restrict_start(ts.saturating_add(1)),
                    ComparisonOperator::LtEq => time_range.restrict_end(ts),
                    ComparisonOperator::Lt => time_range.restrict_end(ts.saturating_sub(1)),
                    ComparisonOperator::Eq => {
                        time_range.restrict_start(ts);
                        time_range.restrict_end(ts);
                    }
                    op => debug!(%op, "ignoring unsupported time comparison"),
                }
                return ControlFlow::Continue(());
            }

            let predicate = Predicate::new(comparison, group);
            if ctx.catalog().is_tag(&measurement, &predicate.operand) {
                tag_predicates.push(predicate);
            } else {
                field_predicates.push(predicate);
            }
            ControlFlow::Continue(())
        });
        if let ControlFlow::Break(e) = res {
            return Err(e);
        }
    }

    let mut group_by_tags = Vec::new();
    let mut group_by_interval = None;
    let mut regex_dimension = false;
    for dimension in &statement.group_by {
        match dimension {
            Dimension::Time {
                interval,
                offset: None,
            } => group_by_interval = Some(interval.to_string()),
            Dimension::Time {
                interval,
                offset: Some(offset),
            } if offset.as_nanos() < 0 => group_by_interval = Some(format!("{interval}{offset}")),
            Dimension::Time {
                interval,
                offset: Some(offset),
            } => group_by_interval = Some(format!("{interval}+{offset}")),
            Dimension::Tag(tag) => group_by_tags.push(tag.as_str().to_string()),
            Dimension::Wildcard => group_by_tags.extend(ctx.catalog().tag_keys(&measurement)),
            Dimension::Regex(_) => regex_dimension = true,
        }
    }
    group_by_tags.sort_unstable();
    group_by_tags.dedup();

    let decomposition = Decomposition {
        measurement,
        fields,
        wildcard,
        aggregation,
        tag_predicates,
        field_predicates,
        time_range,
        group_by_tags,
        group_by_interval,
        statement,
        disjunctive,
        regex_dimension,
    };
    debug!(
        measurement = %decomposition.measurement,
        time_range = %decomposition.time_range,
        cacheable = decomposition.is_cacheable(),
        "decomposed query"
    );
    Ok(decomposition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Table, Value};
    use crate::time::{NANOS_PER_HOUR, NANOS_PER_MINUTE};
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    const START: i64 = 1_566_086_400_000_000_000;
    const END: i64 = 1_566_088_200_000_000_000;

    fn ctx() -> QueryContext {
        let catalog = Catalog::new()
            .with_tags("h2o_feet", ["location"])
            .with_tags("h2o_quality", ["location", "randtag"])
            .with_field("h2o_feet", "water_level", DataType::Float64)
            .with_field("h2o_quality", "index", DataType::Int64);
        QueryContext::new(Arc::new(catalog)).with_now(END + NANOS_PER_HOUR)
    }

    fn decompose(query: &str) -> Decomposition {
        super::decompose(query, &ctx()).unwrap()
    }

    #[test]
    fn test_simple_select() {
        let d = decompose(
            "SELECT water_level FROM h2o_feet WHERE location = 'coyote_creek' \
             AND time >= '2019-08-18T00:00:00Z' AND time <= '2019-08-18T00:30:00Z'",
        );
        assert_eq!(d.measurement, "h2o_feet");
        assert_eq!(d.fields, vec!["water_level"]);
        assert_eq!(d.aggregation, None);
        assert!(!d.wildcard);
        assert_eq!(d.time_range, TimeRange::new(START, END));
        assert_eq!(d.time_range.to_string(), format!("[{START},{END}]"));
        assert!(d.field_predicates.is_empty());
        assert_eq!(
            d.tag_predicates,
            vec![Predicate {
                operand: "location".into(),
                operator: ComparisonOperator::Eq,
                literal: "'coyote_creek'".into(),
                value: "coyote_creek".into(),
                datatype: DataType::String,
                group: LogicalGroup::Conjunction,
            }]
        );
        assert_eq!(d.tag_predicates[0].to_string(), "location='coyote_creek'[string]");
        assert!(d.is_cacheable());
    }

    #[test]
    fn test_group_by_interval() {
        let d = decompose(
            "SELECT MEAN(water_level) FROM h2o_feet WHERE time >= 0 AND time <= 1 GROUP BY time(12m)",
        );
        assert_eq!(d.aggregation.as_deref(), Some("mean"));
        assert_eq!(d.fields, vec!["water_level"]);
        assert_eq!(d.group_by_interval.as_deref(), Some("12m"));

        let d = decompose("SELECT MEAN(water_level) FROM h2o_feet GROUP BY time(12h), location");
        assert_eq!(d.group_by_interval.as_deref(), Some("12h"));
        assert_eq!(d.group_by_tags, vec!["location"]);
        assert!(!d.is_cacheable());

        let d = decompose("SELECT MEAN(water_level) FROM h2o_feet GROUP BY time(60m, -5m)");
        assert_eq!(d.group_by_interval.as_deref(), Some("1h-5m"));

        let d = decompose("SELECT MEAN(water_level) FROM h2o_feet GROUP BY time(1h, 15m)");
        assert_eq!(d.group_by_interval.as_deref(), Some("1h+15m"));
    }

    #[test]
    fn test_group_by_wildcard() {
        let d = decompose("SELECT MEAN(index) FROM h2o_quality GROUP BY *, location");
        assert_eq!(d.group_by_tags, vec!["location", "randtag"]);

        let d = decompose("SELECT MEAN(index) FROM h2o_quality GROUP BY /^rand/");
        assert!(d.group_by_tags.is_empty());
        assert!(!d.is_cacheable());
    }

    #[test]
    fn test_wildcard_projection() {
        let d = decompose("SELECT MEAN(*) FROM h2o_quality WHERE time >= 0 AND time < 10");
        assert!(d.wildcard);
        assert!(d.fields.is_empty());
        assert_eq!(d.time_range, TimeRange::new(0, 9));

        let result = QueryResult::new(vec![
            Table::new("h2o_quality")
                .with_columns(["time", "mean_index", "mean_other"])
                .with_row(vec![Value::Int64(0), Value::Float64(1.0), Value::Float64(2.0)]),
        ]);
        assert_eq!(d.result_fields(&result), vec!["index", "other"]);

        let d = decompose("SELECT * FROM h2o_quality");
        assert!(d.wildcard);
        assert_eq!(d.aggregation, None);
    }

    #[test]
    fn test_predicate_typing() {
        let d = decompose(
            "SELECT index FROM h2o_quality WHERE index > 8 AND level >= 8.5 \
             AND randtag <> '2' AND location =~ /^santa/ AND ok = TRUE AND n < -3",
        );

        let fields: Vec<_> = d.field_predicates.iter().map(ToString::to_string).collect();
        assert_eq!(
            fields,
            vec!["index>8[int64]", "level>=8.5[float64]", "ok=true[bool]", "n<-3[int64]"]
        );

        let tags: Vec<_> = d.tag_predicates.iter().map(ToString::to_string).collect();
        assert_eq!(tags, vec!["randtag!='2'[string]", "location=~/^santa/[string]"]);
        assert_eq!(d.tag_predicates[1].value, "/^santa/");
    }

    #[test]
    fn test_predicate_group() {
        let d = decompose("SELECT index FROM h2o_quality WHERE index > 8 OR (location = 'a' AND randtag = '1')");
        assert_eq!(d.field_predicates[0].group, LogicalGroup::Disjunction);
        assert_eq!(d.tag_predicates[0].group, LogicalGroup::Conjunction);
        assert_eq!(d.tag_predicates[1].group, LogicalGroup::Conjunction);

        let d = decompose("SELECT index FROM h2o_quality WHERE index > 8");
        assert_eq!(d.field_predicates[0].group, LogicalGroup::Standalone);
    }

    #[test]
    fn test_time_range() {
        // strict bounds are adjusted by one nanosecond
        let d = decompose("SELECT v FROM m WHERE time > 10 AND time < 20");
        assert_eq!(d.time_range, TimeRange::new(11, 19));

        // multiple bounds keep the tightest
        let d = decompose("SELECT v FROM m WHERE time >= 10 AND time >= 15 AND time <= 30 AND time <= 20");
        assert_eq!(d.time_range, TimeRange::new(15, 20));

        // equality sets both bounds
        let d = decompose("SELECT v FROM m WHERE time = '2019-08-18T00:00:00Z'");
        assert_eq!(d.time_range, TimeRange::new(START, START));

        // relative to now()
        let d = decompose("SELECT v FROM m WHERE time >= now() - 30m");
        assert_eq!(
            d.time_range,
            TimeRange {
                start: Some(END + NANOS_PER_HOUR - 30 * NANOS_PER_MINUTE),
                end: None,
            }
        );
        assert!(!d.is_cacheable());

        // no time bounds
        let d = decompose("SELECT v FROM m");
        assert_eq!(d.time_range.to_string(), "[empty,empty]");

        // time bounds under OR are not a window
        let d = decompose("SELECT v FROM m WHERE time <= 10 OR time >= 20");
        assert!(!d.is_cacheable());

        // nor are bounds whose closest parent is an AND below an OR
        let d = decompose("SELECT water_level FROM h2o_feet WHERE (time >= 0 AND time <= 10) OR water_level = 1");
        assert_eq!(d.time_range, TimeRange::new(0, 10));
        assert!(!d.is_cacheable());
    }

    #[test]
    fn test_not_cacheable() {
        for clause in [
            "LIMIT 10",
            "OFFSET 1",
            "SLIMIT 1",
            "SOFFSET 1",
            "ORDER BY time DESC",
            "tz('America/Chicago')",
        ] {
            let d = decompose(&format!("SELECT v FROM m WHERE time >= 0 AND time <= 10 {clause}"));
            assert!(!d.is_cacheable(), "{clause} should not be cacheable");
        }

        let d = decompose("SELECT v FROM m WHERE time >= 0 AND time <= 10 ORDER BY time ASC");
        assert!(d.is_cacheable());

        for query in [
            // qualified measurements
            "SELECT v FROM noaa.autogen.m WHERE time >= 0 AND time <= 10",
            "SELECT v FROM autogen.m WHERE time >= 0 AND time <= 10",
            "SELECT v FROM noaa..m WHERE time >= 0 AND time <= 10",
            // fill other than the default
            "SELECT mean(v) FROM m WHERE time >= 0 AND time <= 10 GROUP BY time(1m) fill(none)",
            "SELECT mean(v) FROM m WHERE time >= 0 AND time <= 10 GROUP BY time(1m) fill(0)",
            "SELECT mean(v) FROM m WHERE time >= 0 AND time <= 10 GROUP BY time(1m) fill(previous)",
            // predicates joined by OR at any depth
            "SELECT v FROM m WHERE (a = 1 OR b = 2) AND time >= 0 AND time <= 10",
            "SELECT v FROM m WHERE a = 1 AND (b = 2 OR (c = 3 AND d = 4)) AND time >= 0 AND time <= 10",
        ] {
            assert!(!decompose(query).is_cacheable(), "{query} should not be cacheable");
        }

        let d = decompose(
            "SELECT mean(v) FROM m WHERE time >= 0 AND time <= 10 GROUP BY time(1m) fill(null)",
        );
        assert!(d.is_cacheable());
    }

    #[test]
    fn test_rewrite_time_range() {
        let d = decompose(
            "SELECT MEAN(water_level) FROM h2o_feet WHERE (location = 'a' OR location = 'b') \
             AND time >= '2019-08-18T00:00:00Z' AND time <= '2019-08-18T00:30:00Z' \
             GROUP BY time(12m)",
        );
        assert_eq!(
            d.rewrite_time_range(1, 2),
            "SELECT mean(water_level) FROM h2o_feet WHERE (location = 'a' OR location = 'b') \
             AND time >= 1 AND time <= 2 GROUP BY time(12m)"
        );
        assert_eq!(
            d.signature(),
            "SELECT mean(water_level) FROM h2o_feet WHERE (location = 'a' OR location = 'b') \
             GROUP BY time(12m)"
        );

        // the rewritten query decomposes to the new window
        let rewritten = decompose(&d.rewrite_time_range(START, END));
        assert_eq!(rewritten.time_range, TimeRange::new(START, END));
        assert_eq!(rewritten.signature(), d.signature());

        let d = decompose("SELECT v FROM m WHERE a = 1 AND b = 2 AND time > 5");
        assert_eq!(
            d.rewrite_time_range(6, 7),
            "SELECT v FROM m WHERE (a = 1 AND b = 2) AND time >= 6 AND time <= 7"
        );

        let d = decompose("SELECT v FROM m");
        assert_eq!(
            d.rewrite_time_range(6, 7),
            "SELECT v FROM m WHERE time >= 6 AND time <= 7"
        );
    }

    #[test]
    fn test_decompose_errors() {
        let ctx = ctx();
        assert_matches!(
            super::decompose("SHOW MEASUREMENTS", &ctx),
            Err(DecomposeError::MissingProjection)
        );
        assert_matches!(
            super::decompose("SELECT water_level", &ctx),
            Err(DecomposeError::Syntax { .. })
        );
        assert_matches!(
            super::decompose("SELECT v FROM /h2o.*/", &ctx),
            Err(DecomposeError::RegexMeasurement { regex }) if regex == "/h2o.*/"
        );
        assert_matches!(
            super::decompose("SELECT v FROM m WHERE time > 'yesterday'", &ctx),
            Err(DecomposeError::InvalidTimeLiteral { text }) if text == "'yesterday'"
        );
    }
}
