//! The InfluxQL `SELECT` statement.
//!
//! ```text
//! select_stmt ::= "SELECT" fields from_clause where_clause? group_by_clause? fill_clause?
//!                 order_by_clause? limit_clause? offset_clause? slimit_clause? soffset_clause?
//!                 tz_clause?
//! ```

use crate::parser::expression::{ConditionalExpression, conditional_expression};
use crate::parser::identifier::{Identifier, identifier, unquoted_identifier};
use crate::parser::internal::{ParseResult, expect, map_fail};
use crate::parser::keywords::keyword;
use crate::parser::literal::{Duration, Literal, duration, literal, number, unsigned_integer};
use crate::parser::string::{Regex, regex, single_quoted_string, write_single_quoted};
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{char, multispace0, multispace1};
use nom::combinator::{map, opt, value};
use nom::multi::{separated_list0, separated_list1};
use nom::sequence::{delimited, pair, preceded, terminated, tuple};
use std::fmt::{self, Display, Formatter};

/// A measurement name as either an identifier or a regular expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MeasurementName {
    Name(Identifier),
    Regex(Regex),
}

impl Display for MeasurementName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(ident) => Display::fmt(ident, f),
            Self::Regex(regex) => Display::fmt(regex, f),
        }
    }
}

/// A fully-qualified, 3-part measurement name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualifiedMeasurementName {
    pub database: Option<Identifier>,
    pub retention_policy: Option<Identifier>,
    pub name: MeasurementName,
}

impl Display for QualifiedMeasurementName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match (&self.database, &self.retention_policy) {
            (None, None) => write!(f, "{}", self.name),
            (Some(db), None) => write!(f, "{db}..{}", self.name),
            (None, Some(rp)) => write!(f, "{rp}.{}", self.name),
            (Some(db), Some(rp)) => write!(f, "{db}.{rp}.{}", self.name),
        }
    }
}

/// Match a fully-qualified, 3-part measurement name.
///
/// ```text
/// qualified_measurement_name ::= measurement_name |
///                              ( policy_name "." measurement_name ) |
///                              ( db_name "." policy_name? "." measurement_name )
/// ```
fn qualified_measurement_name(i: &str) -> ParseResult<&str, QualifiedMeasurementName> {
    let measurement_name = alt((
        map(identifier, MeasurementName::Name),
        map(regex, MeasurementName::Regex),
    ));

    let (remaining, (db_rp, name)) = pair(
        opt(alt((
            // database "." retention_policy "."
            map(
                pair(
                    terminated(identifier, tag(".")),
                    terminated(identifier, tag(".")),
                ),
                |(db, rp)| (Some(db), Some(rp)),
            ),
            // database ".."
            map(terminated(identifier, tag("..")), |db| (Some(db), None)),
            // retention_policy "."
            map(terminated(identifier, tag(".")), |rp| (None, Some(rp))),
        ))),
        measurement_name,
    )(i)?;

    let (database, retention_policy) = db_rp.unwrap_or((None, None));

    Ok((
        remaining,
        QualifiedMeasurementName {
            database,
            retention_policy,
            name,
        },
    ))
}

/// The data type cast of a variable reference, as in `water_level::float`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VarRefDataType {
    Float,
    Integer,
    Unsigned,
    String,
    Boolean,
    Tag,
    Field,
}

impl Display for VarRefDataType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Float => "float",
            Self::Integer => "integer",
            Self::Unsigned => "unsigned",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Tag => "tag",
            Self::Field => "field",
        })
    }
}

fn var_ref_data_type(i: &str) -> ParseResult<&str, VarRefDataType> {
    alt((
        value(VarRefDataType::Float, keyword("FLOAT")),
        value(VarRefDataType::Integer, keyword("INTEGER")),
        value(VarRefDataType::Unsigned, keyword("UNSIGNED")),
        value(VarRefDataType::String, keyword("STRING")),
        value(VarRefDataType::Boolean, keyword("BOOLEAN")),
        value(VarRefDataType::Tag, keyword("TAG")),
        value(VarRefDataType::Field, keyword("FIELD")),
    ))(i)
}

/// A function call in the projection, such as `MEAN(water_level)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    /// The function name, lowercased.
    pub name: String,
    pub args: Vec<FieldExpr>,
}

impl Display for Call {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}

/// An expression of the projection list.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldExpr {
    Wildcard,
    VarRef {
        name: Identifier,
        data_type: Option<VarRefDataType>,
    },
    Call(Call),
    Literal(Literal),
}

impl FieldExpr {
    /// Appends the names of all variable references within the expression to `out`.
    pub fn var_refs<'a>(&'a self, out: &mut Vec<&'a Identifier>) {
        match self {
            Self::VarRef { name, .. } => out.push(name),
            Self::Call(call) => call.args.iter().for_each(|a| a.var_refs(out)),
            Self::Wildcard | Self::Literal(_) => {}
        }
    }

    /// Returns true if the expression is or contains a wildcard.
    pub fn has_wildcard(&self) -> bool {
        match self {
            Self::Wildcard => true,
            Self::Call(call) => call.args.iter().any(Self::has_wildcard),
            Self::VarRef { .. } | Self::Literal(_) => false,
        }
    }
}

impl Display for FieldExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wildcard => f.write_str("*"),
            Self::VarRef {
                name,
                data_type: None,
            } => write!(f, "{name}"),
            Self::VarRef {
                name,
                data_type: Some(dt),
            } => write!(f, "{name}::{dt}"),
            Self::Call(call) => write!(f, "{call}"),
            Self::Literal(lit) => write!(f, "{lit}"),
        }
    }
}

/// A projected field with an optional alias.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub expr: FieldExpr,
    pub alias: Option<Identifier>,
}

impl Display for Field {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr)?;
        if let Some(alias) = &self.alias {
            write!(f, " AS {alias}")?;
        }
        Ok(())
    }
}

fn call(i: &str) -> ParseResult<&str, Call> {
    map(
        pair(
            unquoted_identifier,
            delimited(
                pair(multispace0, char('(')),
                separated_list0(
                    preceded(multispace0, char(',')),
                    preceded(multispace0, field_expr),
                ),
                expect(
                    "invalid function call, expected closing parenthesis",
                    preceded(multispace0, char(')')),
                ),
            ),
        ),
        |(name, args)| Call {
            name: name.to_ascii_lowercase(),
            args,
        },
    )(i)
}

fn field_expr(i: &str) -> ParseResult<&str, FieldExpr> {
    alt((
        map(call, FieldExpr::Call),
        value(FieldExpr::Wildcard, char('*')),
        map(literal, FieldExpr::Literal),
        map(
            pair(
                identifier,
                opt(preceded(
                    tag("::"),
                    expect(
                        "invalid data type for tag or field reference, expected float, integer, unsigned, string, boolean, field, tag",
                        var_ref_data_type,
                    ),
                )),
            ),
            |(name, data_type)| FieldExpr::VarRef { name, data_type },
        ),
    ))(i)
}

fn field(i: &str) -> ParseResult<&str, Field> {
    map(
        pair(
            preceded(multispace0, field_expr),
            opt(preceded(
                pair(multispace1, keyword("AS")),
                expect("invalid field alias, expected identifier", identifier),
            )),
        ),
        |(expr, alias)| Field { expr, alias },
    )(i)
}

/// A `GROUP BY` dimension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dimension {
    Time {
        interval: Duration,
        offset: Option<Duration>,
    },
    Tag(Identifier),
    Regex(Regex),
    Wildcard,
}

impl Display for Dimension {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time {
                interval,
                offset: None,
            } => write!(f, "time({interval})"),
            Self::Time {
                interval,
                offset: Some(offset),
            } => write!(f, "time({interval}, {offset})"),
            Self::Tag(tag) => write!(f, "{tag}"),
            Self::Regex(re) => write!(f, "{re}"),
            Self::Wildcard => f.write_str("*"),
        }
    }
}

fn time_dimension(i: &str) -> ParseResult<&str, Dimension> {
    preceded(
        pair(keyword("TIME"), pair(multispace0, char('('))),
        expect(
            "invalid TIME dimension, expected duration",
            map(
                terminated(
                    pair(
                        preceded(multispace0, duration),
                        opt(preceded(
                            tuple((multispace0, char(','), multispace0)),
                            duration,
                        )),
                    ),
                    pair(multispace0, char(')')),
                ),
                |(interval, offset)| Dimension::Time { interval, offset },
            ),
        ),
    )(i)
}

fn dimension(i: &str) -> ParseResult<&str, Dimension> {
    alt((
        time_dimension,
        value(Dimension::Wildcard, char('*')),
        map(regex, Dimension::Regex),
        map(identifier, Dimension::Tag),
    ))(i)
}

fn group_by_clause(i: &str) -> ParseResult<&str, Vec<Dimension>> {
    preceded(
        tuple((keyword("GROUP"), multispace1, keyword("BY"))),
        expect(
            "invalid GROUP BY clause, expected wildcard, TIME, identifier or regular expression",
            separated_list1(
                preceded(multispace0, char(',')),
                preceded(multispace0, dimension),
            ),
        ),
    )(i)
}

/// The `fill()` option of a `GROUP BY time()` query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FillClause {
    Null,
    None,
    Previous,
    Linear,
    Value(f64),
}

impl Display for FillClause {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("fill(null)"),
            Self::None => f.write_str("fill(none)"),
            Self::Previous => f.write_str("fill(previous)"),
            Self::Linear => f.write_str("fill(linear)"),
            Self::Value(v) => write!(f, "fill({v})"),
        }
    }
}

fn fill_clause(i: &str) -> ParseResult<&str, FillClause> {
    preceded(
        pair(keyword("FILL"), multispace0),
        expect(
            "invalid FILL clause, expected NULL, NONE, PREVIOUS, LINEAR, or a number",
            delimited(
                pair(char('('), multispace0),
                alt((
                    value(FillClause::Null, keyword("NULL")),
                    value(FillClause::None, keyword("NONE")),
                    value(FillClause::Previous, keyword("PREVIOUS")),
                    value(FillClause::Linear, keyword("LINEAR")),
                    map_fail("invalid FILL clause, expected a number", number, |n| match n {
                        Literal::Integer(v) => Ok(FillClause::Value(v as f64)),
                        Literal::Float(v) => Ok(FillClause::Value(v)),
                        _ => Err(()),
                    }),
                )),
                pair(multispace0, char(')')),
            ),
        ),
    )(i)
}

/// The direction of an `ORDER BY time` clause.
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub enum OrderByClause {
    #[default]
    Ascending,
    Descending,
}

impl Display for OrderByClause {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ascending => "ORDER BY TIME ASC",
            Self::Descending => "ORDER BY TIME DESC",
        })
    }
}

/// Parse an InfluxQL `ORDER BY` clause.
///
/// ```text
/// order_by   ::= "ORDER" "BY" (time_order | order)
/// order      ::= "ASC | "DESC
/// time_order ::= "TIME" order?
/// ```
fn order_by_clause(i: &str) -> ParseResult<&str, OrderByClause> {
    let order = || {
        preceded(
            multispace1,
            alt((
                value(OrderByClause::Ascending, keyword("ASC")),
                value(OrderByClause::Descending, keyword("DESC")),
            )),
        )
    };

    preceded(
        pair(keyword("ORDER"), preceded(multispace1, keyword("BY"))),
        expect(
            "invalid ORDER BY, expected ASC, DESC or TIME",
            alt((
                order(),
                map(
                    preceded(preceded(multispace1, keyword("TIME")), opt(order())),
                    Option::<_>::unwrap_or_default,
                ),
            )),
        ),
    )(i)
}

/// Parse a `<kw> <n>` clause, such as `LIMIT 10`.
fn unsigned_clause<'a>(
    kw: &'static str,
    message: &'static str,
) -> impl FnMut(&'a str) -> ParseResult<&'a str, u64> {
    preceded(pair(keyword(kw), multispace1), expect(message, unsigned_integer))
}

fn tz_clause(i: &str) -> ParseResult<&str, String> {
    preceded(
        pair(keyword("TZ"), multispace0),
        expect(
            "invalid TZ clause, expected string",
            delimited(
                pair(char('('), multispace0),
                single_quoted_string,
                pair(multispace0, char(')')),
            ),
        ),
    )(i)
}

/// A parsed `SELECT` statement.
#[derive(Clone, Debug, PartialEq)]
pub struct SelectStatement {
    pub fields: Vec<Field>,
    pub from: QualifiedMeasurementName,
    pub condition: Option<ConditionalExpression>,
    pub group_by: Vec<Dimension>,
    pub fill: Option<FillClause>,
    pub order_by: Option<OrderByClause>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub series_limit: Option<u64>,
    pub series_offset: Option<u64>,
    pub timezone: Option<String>,
}

impl SelectStatement {
    /// Returns the `GROUP BY time(...)` dimension, if present.
    pub fn group_by_time(&self) -> Option<(Duration, Option<Duration>)> {
        self.group_by.iter().find_map(|d| match d {
            Dimension::Time { interval, offset } => Some((*interval, *offset)),
            _ => None,
        })
    }
}

impl Display for SelectStatement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        for (i, field) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{field}")?;
        }
        write!(f, " FROM {}", self.from)?;

        if let Some(condition) = &self.condition {
            write!(f, " WHERE {condition}")?;
        }
        if !self.group_by.is_empty() {
            f.write_str(" GROUP BY ")?;
            for (i, dim) in self.group_by.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{dim}")?;
            }
        }
        if let Some(fill) = &self.fill {
            write!(f, " {fill}")?;
        }
        if let Some(order_by) = &self.order_by {
            write!(f, " {order_by}")?;
        }
        if let Some(v) = self.limit {
            write!(f, " LIMIT {v}")?;
        }
        if let Some(v) = self.offset {
            write!(f, " OFFSET {v}")?;
        }
        if let Some(v) = self.series_limit {
            write!(f, " SLIMIT {v}")?;
        }
        if let Some(v) = self.series_offset {
            write!(f, " SOFFSET {v}")?;
        }
        if let Some(tz) = &self.timezone {
            f.write_str(" tz(")?;
            write_single_quoted(f, tz)?;
            f.write_str(")")?;
        }
        Ok(())
    }
}

/// Parse a `SELECT` statement.
pub(crate) fn select_statement(i: &str) -> ParseResult<&str, SelectStatement> {
    let (i, _) = preceded(multispace0, keyword("SELECT"))(i)?;
    let (i, fields) = expect(
        "invalid SELECT statement, expected field",
        preceded(
            multispace1,
            separated_list1(preceded(multispace0, char(',')), field),
        ),
    )(i)?;
    let (i, from) = expect(
        "invalid SELECT statement, expected FROM clause",
        preceded(
            tuple((multispace1, keyword("FROM"), multispace0)),
            qualified_measurement_name,
        ),
    )(i)?;
    let (i, condition) = opt(preceded(
        tuple((multispace1, keyword("WHERE"), multispace0)),
        expect(
            "invalid WHERE clause, expected conditional expression",
            conditional_expression,
        ),
    ))(i)?;
    let (i, group_by) = opt(preceded(multispace1, group_by_clause))(i)?;
    let (i, fill) = opt(preceded(multispace1, fill_clause))(i)?;
    let (i, order_by) = opt(preceded(multispace1, order_by_clause))(i)?;
    let (i, limit) = opt(preceded(
        multispace1,
        unsigned_clause("LIMIT", "invalid LIMIT clause, expected unsigned integer"),
    ))(i)?;
    let (i, offset) = opt(preceded(
        multispace1,
        unsigned_clause("OFFSET", "invalid OFFSET clause, expected unsigned integer"),
    ))(i)?;
    let (i, series_limit) = opt(preceded(
        multispace1,
        unsigned_clause("SLIMIT", "invalid SLIMIT clause, expected unsigned integer"),
    ))(i)?;
    let (i, series_offset) = opt(preceded(
        multispace1,
        unsigned_clause("SOFFSET", "invalid SOFFSET clause, expected unsigned integer"),
    ))(i)?;
    let (i, timezone) = opt(preceded(multispace1, tz_clause))(i)?;

    Ok((
        i,
        SelectStatement {
            fields,
            from,
            condition,
            group_by: group_by.unwrap_or_default(),
            fill,
            order_by,
            limit,
            offset,
            series_limit,
            series_offset,
            timezone,
        },
    ))
}
