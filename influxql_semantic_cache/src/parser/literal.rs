//! Literal values: numbers, strings, booleans, durations and regular expressions.

use crate::parser::internal::{ParseResult, map_fail};
use crate::parser::keywords::keyword;
use crate::parser::string::{Regex, regex, single_quoted_string, write_single_quoted};
use crate::time::{format_duration, parse_duration};
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{alphanumeric1, char, digit1, one_of};
use nom::combinator::{map, not, opt, peek, recognize, value};
use nom::multi::many1_count;
use nom::sequence::{pair, terminated, tuple};
use std::fmt::{Display, Formatter};

/// A duration in nanoseconds, written with InfluxQL unit suffixes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Duration(pub i64);

impl Duration {
    pub fn as_nanos(self) -> i64 {
        self.0
    }
}

impl Display for Duration {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&format_duration(self.0))
    }
}

/// Primitive InfluxQL literal values.
#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Integer(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Duration(Duration),
    Regex(Regex),
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) if v.is_finite() && v.fract() == 0.0 => write!(f, "{v:.1}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => write_single_quoted(f, v),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Duration(v) => write!(f, "{v}"),
            Self::Regex(v) => write!(f, "{v}"),
        }
    }
}

/// Parse an unsigned integer.
pub(crate) fn unsigned_integer(i: &str) -> ParseResult<&str, u64> {
    map_fail("unable to parse unsigned integer", digit1, &str::parse)(i)
}

/// Parse a duration literal such as `12m`, `1h30m` or `-5s`.
///
/// ```text
/// duration_lit  ::= "-"? ( int_lit duration_unit )+
/// duration_unit ::= "ns" | "u" | "µ" | "us" | "µs" | "ms" | "s" | "m" | "h" | "d" | "w"
/// ```
pub(crate) fn duration(i: &str) -> ParseResult<&str, Duration> {
    let unit = alt((
        tag("ns"),
        tag("µs"),
        tag("us"),
        tag("ms"),
        tag("u"),
        tag("µ"),
        tag("s"),
        tag("m"),
        tag("h"),
        tag("d"),
        tag("w"),
    ));

    map_fail(
        "invalid duration, value out of range",
        terminated(
            recognize(pair(opt(char('-')), many1_count(pair(digit1, unit)))),
            not(peek(alt((alphanumeric1, tag("_"))))),
        ),
        |s: &str| parse_duration(s).map(Duration).ok_or(()),
    )(i)
}

/// Parse an integer or floating point number, with an optional leading sign.
pub(crate) fn number(i: &str) -> ParseResult<&str, Literal> {
    let exponent = tuple((one_of("eE"), opt(one_of("+-")), digit1));

    map_fail(
        "invalid number",
        recognize(tuple((
            opt(char('-')),
            digit1,
            opt(pair(char('.'), digit1)),
            opt(exponent),
        ))),
        |s: &str| {
            if s.contains(['.', 'e', 'E']) {
                s.parse::<f64>().map(Literal::Float).map_err(|_| ())
            } else {
                s.parse::<i64>().map(Literal::Integer).map_err(|_| ())
            }
        },
    )(i)
}

/// Parse a case-insensitive `TRUE` or `FALSE` literal.
pub(crate) fn boolean(i: &str) -> ParseResult<&str, bool> {
    alt((value(true, keyword("TRUE")), value(false, keyword("FALSE"))))(i)
}

/// Parse any literal value.
pub(crate) fn literal(i: &str) -> ParseResult<&str, Literal> {
    alt((
        map(duration, Literal::Duration),
        number,
        map(single_quoted_string, Literal::String),
        map(regex, Literal::Regex),
        map(boolean, Literal::Boolean),
    ))(i)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::assert_expect_error;
    use crate::time::{NANOS_PER_HOUR, NANOS_PER_MINUTE, NANOS_PER_SECOND};

    #[test]
    fn test_duration() {
        let (_, got) = duration("12m").unwrap();
        assert_eq!(got, Duration(12 * NANOS_PER_MINUTE));

        let (_, got) = duration("1h30m").unwrap();
        assert_eq!(got, Duration(90 * NANOS_PER_MINUTE));

        let (rem, got) = duration("-5s)").unwrap();
        assert_eq!(got, Duration(-5 * NANOS_PER_SECOND));
        assert_eq!(rem, ")");

        assert_eq!(Duration(12 * NANOS_PER_HOUR).to_string(), "12h");

        // Not a duration: trailing identifier characters
        duration("12mx").unwrap_err();
        duration("12").unwrap_err();

        assert_expect_error!(
            duration("9223372036854775807w"),
            "invalid duration, value out of range"
        );
    }

    #[test]
    fn test_number() {
        let (_, got) = number("8").unwrap();
        assert_eq!(got, Literal::Integer(8));

        let (_, got) = number("-8").unwrap();
        assert_eq!(got, Literal::Integer(-8));

        let (_, got) = number("8.5").unwrap();
        assert_eq!(got, Literal::Float(8.5));

        let (_, got) = number("1e3").unwrap();
        assert_eq!(got, Literal::Float(1000.0));

        assert_expect_error!(number("92233720368547758070"), "invalid number");
    }

    #[test]
    fn test_literal() {
        let (_, got) = literal("'coyote_creek'").unwrap();
        assert_eq!(got, Literal::String("coyote_creek".into()));

        let (_, got) = literal("TRUE").unwrap();
        assert_eq!(got, Literal::Boolean(true));

        let (_, got) = literal("/^santa/").unwrap();
        assert_eq!(got, Literal::Regex("^santa".into()));

        let (_, got) = literal("1566086400s").unwrap();
        assert_eq!(got, Literal::Duration(Duration(1_566_086_400 * NANOS_PER_SECOND)));

        // an identifier is not a literal
        literal("location").unwrap_err();
        literal("trueish").unwrap_err();
    }

    #[test]
    fn test_literal_display() {
        assert_eq!(Literal::Float(8.0).to_string(), "8.0");
        assert_eq!(Literal::Float(8.25).to_string(), "8.25");
        assert_eq!(Literal::String("it's".into()).to_string(), r#"'it\'s'"#);
        assert_eq!(Literal::Boolean(false).to_string(), "false");
    }
}
