//! # Parse an InfluxQL [identifier]
//!
//! Identifiers are parsed using the following rules:
//!
//! * double quoted identifiers can contain any unicode character other than a new line
//! * double quoted identifiers can contain escaped characters, namely `\"`, `\n` and `\\`
//! * double quoted identifiers can contain InfluxQL keywords
//! * unquoted identifiers must start with an upper or lowercase ASCII character or `_`
//! * unquoted identifiers may contain only ASCII letters, decimal digits, and `_`
//! * identifiers may be preceded by whitespace
//!
//! [identifier]: https://docs.influxdata.com/influxdb/v1.8/query_language/spec/#identifiers

use crate::parser::internal::ParseResult;
use crate::parser::keywords::sql_keyword;
use crate::parser::string::double_quoted_string;
use crate::write_escaped;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{alpha1, alphanumeric1, multispace0};
use nom::combinator::{eof, map, not, recognize};
use nom::multi::many0_count;
use nom::sequence::{pair, preceded, terminated};
use std::fmt::{self, Display, Formatter, Write};
use std::ops::Deref;

/// Parse an unquoted InfluxQL identifier.
pub(crate) fn unquoted_identifier(i: &str) -> ParseResult<&str, &str> {
    preceded(
        not(sql_keyword),
        recognize(pair(
            alt((alpha1, tag("_"))),
            many0_count(alt((alphanumeric1, tag("_")))),
        )),
    )(i)
}

/// A type that represents an InfluxQL identifier.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub struct Identifier(pub(crate) String);

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Identifier {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Deref for Identifier {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Identifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier requires quotes.
    pub fn requires_quotes(&self) -> bool {
        terminated(unquoted_identifier, eof)(self.0.as_str()).is_err()
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.requires_quotes() {
            f.write_char('"')?;
            write_escaped!(f, self.0, '\n' => "\\n", '\\' => "\\\\", '"' => "\\\"");
            f.write_char('"')
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Parses an InfluxQL [Identifier].
///
/// ```text
/// identifier          ::= whitespace? ( quoted_identifier | unquoted_identifier )
/// unquoted_identifier ::= [_a..zA..Z] [_a..zA..Z0..9]*
/// quoted_identifier   ::= '"' [^"\n] '"'
/// ```
pub(crate) fn identifier(i: &str) -> ParseResult<&str, Identifier> {
    preceded(
        multispace0,
        alt((
            map(unquoted_identifier, Into::into),
            map(double_quoted_string, Into::into),
        )),
    )(i)
}
