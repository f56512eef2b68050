//! Conditional expressions of a `WHERE` clause.
//!
//! The grammar is the subset of InfluxQL conditions found in cacheable queries: comparisons of
//! an identifier against an arithmetic operand, combined with `AND` / `OR` and parentheses.
//!
//! ```text
//! condition   ::= conjunction ( "OR" conjunction )*
//! conjunction ::= unary ( "AND" unary )*
//! unary       ::= "(" condition ")" | comparison
//! comparison  ::= identifier operator operand
//! operator    ::= "=" | "!=" | "<>" | ">" | ">=" | "<" | "<=" | "=~" | "!~"
//! operand     ::= term ( ( "+" | "-" ) term )*
//! term        ::= call | literal | identifier
//! ```

use crate::parser::identifier::{Identifier, identifier, unquoted_identifier};
use crate::parser::internal::{ParseResult, expect};
use crate::parser::keywords::keyword;
use crate::parser::literal::{Literal, literal};
use crate::time::parse_timestamp;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{char, multispace0};
use nom::combinator::{consumed, map, value};
use nom::multi::{fold_many0, separated_list0};
use nom::sequence::{delimited, pair, preceded, tuple};
use std::fmt::{Display, Formatter};

/// Arithmetic operators permitted in comparison operands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add,
    Sub,
}

impl Display for BinaryOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Sub => "-",
        })
    }
}

/// An arithmetic expression on the right hand side of a comparison.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Literal),
    VarRef(Identifier),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Binary {
        lhs: Box<Expr>,
        op: BinaryOperator,
        rhs: Box<Expr>,
    },
}

impl Expr {
    /// Evaluate the expression as a nanosecond timestamp.
    ///
    /// Integers are nanosecond epochs, strings are parsed as timestamps, durations are offsets
    /// from the epoch and `now()` resolves to `now`. Returns `None` for anything else.
    pub fn eval_timestamp(&self, now: i64) -> Option<i64> {
        match self {
            Self::Literal(Literal::Integer(v)) => Some(*v),
            Self::Literal(Literal::Float(v)) if v.is_finite() => Some(*v as i64),
            Self::Literal(Literal::String(s)) => parse_timestamp(s),
            Self::Literal(Literal::Duration(d)) => Some(d.as_nanos()),
            Self::Call { name, args } if name.eq_ignore_ascii_case("now") && args.is_empty() => {
                Some(now)
            }
            Self::Binary { lhs, op, rhs } => {
                let lhs = lhs.eval_timestamp(now)?;
                let rhs = rhs.eval_timestamp(now)?;
                match op {
                    BinaryOperator::Add => lhs.checked_add(rhs),
                    BinaryOperator::Sub => lhs.checked_sub(rhs),
                }
            }
            _ => None,
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Literal(v) => write!(f, "{v}"),
            Self::VarRef(v) => write!(f, "{v}"),
            Self::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            Self::Binary { lhs, op, rhs } => write!(f, "{lhs} {op} {rhs}"),
        }
    }
}

/// Comparison operators. `<>` is accepted on input and normalized to `!=`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComparisonOperator {
    Eq,
    NotEq,
    EqRegex,
    NotEqRegex,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

impl ComparisonOperator {
    /// All operators, ordered so that no operator is listed after one of its prefixes.
    pub const ALL: [Self; 8] = [
        Self::EqRegex,
        Self::NotEqRegex,
        Self::NotEq,
        Self::GtEq,
        Self::LtEq,
        Self::Eq,
        Self::Gt,
        Self::Lt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::EqRegex => "=~",
            Self::NotEqRegex => "!~",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
        }
    }

    /// Match the longest operator at the start of `s`, returning it with its length.
    pub fn match_prefix(s: &str) -> Option<(Self, usize)> {
        Self::ALL
            .into_iter()
            .find(|op| s.starts_with(op.as_str()))
            .map(|op| (op, op.as_str().len()))
    }
}

impl Display for ComparisonOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The right hand side of a comparison, with the source text it was parsed from.
#[derive(Clone, Debug, PartialEq)]
pub struct Operand {
    pub text: String,
    pub expr: Expr,
}

impl Operand {
    /// Build an operand from an expression, rendering its source text.
    pub fn new(expr: Expr) -> Self {
        Self {
            text: expr.to_string(),
            expr,
        }
    }
}

impl Display for Operand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

/// A single `identifier operator operand` predicate.
#[derive(Clone, Debug, PartialEq)]
pub struct Comparison {
    pub lhs: Identifier,
    pub op: ComparisonOperator,
    pub rhs: Operand,
}

impl Display for Comparison {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.lhs, self.op, self.rhs)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConditionalOperator {
    And,
    Or,
}

impl Display for ConditionalOperator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::And => "AND",
            Self::Or => "OR",
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConditionalBinary {
    pub lhs: Box<ConditionalExpression>,
    pub op: ConditionalOperator,
    pub rhs: Box<ConditionalExpression>,
}

/// A node of a `WHERE` clause condition tree.
#[derive(Clone, Debug, PartialEq)]
pub enum ConditionalExpression {
    Comparison(Comparison),
    Binary(ConditionalBinary),
    Grouped(Box<ConditionalExpression>),
}

impl ConditionalExpression {
    /// Combine two conditions with `op`.
    pub fn binary(lhs: Self, op: ConditionalOperator, rhs: Self) -> Self {
        Self::Binary(ConditionalBinary {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
        })
    }

    /// Returns a copy of the condition with every comparison against `name` removed.
    ///
    /// A binary node that loses one side collapses to the other side. Returns `None` when
    /// nothing remains.
    pub fn without_comparisons_on(&self, name: &str) -> Option<Self> {
        match self {
            Self::Comparison(c) if c.lhs.eq_ignore_ascii_case(name) => None,
            Self::Comparison(_) => Some(self.clone()),
            Self::Binary(ConditionalBinary { lhs, op, rhs }) => {
                match (
                    lhs.without_comparisons_on(name),
                    rhs.without_comparisons_on(name),
                ) {
                    (Some(lhs), Some(rhs)) => Some(Self::binary(lhs, *op, rhs)),
                    (Some(e), None) | (None, Some(e)) => Some(e),
                    (None, None) => None,
                }
            }
            Self::Grouped(inner) => inner
                .without_comparisons_on(name)
                .map(|e| Self::Grouped(Box::new(e))),
        }
    }
}

impl Display for ConditionalExpression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Comparison(c) => write!(f, "{c}"),
            Self::Binary(ConditionalBinary { lhs, op, rhs }) => write!(f, "{lhs} {op} {rhs}"),
            Self::Grouped(inner) => write!(f, "({inner})"),
        }
    }
}

fn comparison_operator(i: &str) -> ParseResult<&str, ComparisonOperator> {
    alt((
        value(ComparisonOperator::EqRegex, tag("=~")),
        value(ComparisonOperator::NotEqRegex, tag("!~")),
        value(ComparisonOperator::NotEq, tag("!=")),
        value(ComparisonOperator::NotEq, tag("<>")),
        value(ComparisonOperator::GtEq, tag(">=")),
        value(ComparisonOperator::LtEq, tag("<=")),
        value(ComparisonOperator::Eq, tag("=")),
        value(ComparisonOperator::Gt, tag(">")),
        value(ComparisonOperator::Lt, tag("<")),
    ))(i)
}

/// Parse a function call such as `now()`.
fn call(i: &str) -> ParseResult<&str, Expr> {
    map(
        pair(
            unquoted_identifier,
            delimited(
                pair(multispace0, char('(')),
                separated_list0(
                    preceded(multispace0, char(',')),
                    preceded(multispace0, arithmetic),
                ),
                pair(multispace0, char(')')),
            ),
        ),
        |(name, args)| Expr::Call {
            name: name.to_ascii_lowercase(),
            args,
        },
    )(i)
}

fn term(i: &str) -> ParseResult<&str, Expr> {
    alt((call, map(literal, Expr::Literal), map(identifier, Expr::VarRef)))(i)
}

fn arithmetic(i: &str) -> ParseResult<&str, Expr> {
    let (i, first) = term(i)?;
    fold_many0(
        tuple((
            multispace0,
            alt((
                value(BinaryOperator::Add, char('+')),
                value(BinaryOperator::Sub, char('-')),
            )),
            multispace0,
            term,
        )),
        move || first.clone(),
        |lhs, (_, op, _, rhs)| Expr::Binary {
            lhs: Box::new(lhs),
            op,
            rhs: Box::new(rhs),
        },
    )(i)
}

fn operand(i: &str) -> ParseResult<&str, Operand> {
    map(consumed(arithmetic), |(text, expr)| Operand {
        text: text.trim().to_string(),
        expr,
    })(i)
}

fn comparison(i: &str) -> ParseResult<&str, Comparison> {
    map(
        tuple((
            identifier,
            preceded(multispace0, comparison_operator),
            expect(
                "invalid conditional expression, expected operand",
                preceded(multispace0, operand),
            ),
        )),
        |(lhs, op, rhs)| Comparison { lhs, op, rhs },
    )(i)
}

fn unary(i: &str) -> ParseResult<&str, ConditionalExpression> {
    preceded(
        multispace0,
        alt((
            map(
                delimited(
                    char('('),
                    conditional_expression,
                    expect(
                        "invalid conditional expression, expected closing parenthesis",
                        preceded(multispace0, char(')')),
                    ),
                ),
                |e| ConditionalExpression::Grouped(Box::new(e)),
            ),
            map(comparison, ConditionalExpression::Comparison),
        )),
    )(i)
}

fn logical<'a>(
    op: ConditionalOperator,
    inner: fn(&'a str) -> ParseResult<&'a str, ConditionalExpression>,
) -> impl FnMut(&'a str) -> ParseResult<&'a str, ConditionalExpression> {
    let kw = match op {
        ConditionalOperator::And => "AND",
        ConditionalOperator::Or => "OR",
    };
    move |i| {
        let (i, first) = inner(i)?;
        fold_many0(
            preceded(
                tuple((multispace0, keyword(kw), multispace0)),
                expect("invalid conditional expression", inner),
            ),
            move || first.clone(),
            move |lhs, rhs| ConditionalExpression::binary(lhs, op, rhs),
        )(i)
    }
}

fn conjunction(i: &str) -> ParseResult<&str, ConditionalExpression> {
    logical(ConditionalOperator::And, unary)(i)
}

/// Parse a conditional expression, where `AND` binds tighter than `OR`.
pub(crate) fn conditional_expression(i: &str) -> ParseResult<&str, ConditionalExpression> {
    logical(ConditionalOperator::Or, conjunction)(i)
}
