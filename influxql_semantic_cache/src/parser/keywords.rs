//! Keyword matching for the supported InfluxQL subset.

use crate::parser::internal::ParseResult;
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::bytes::complete::tag_no_case;
use nom::character::complete::{alpha1, alphanumeric1};
use nom::combinator::{not, peek, recognize, verify};
use nom::multi::many0_count;
use nom::sequence::{pair, terminated};

/// Reserved words which may not be used as unquoted identifiers.
const KEYWORDS: &[&str] = &[
    "AND", "AS", "ASC", "BY", "DESC", "FILL", "FROM", "GROUP", "LIMIT", "OFFSET", "OR", "ORDER",
    "SELECT", "SLIMIT", "SOFFSET", "WHERE",
];

/// Recognizes a run of identifier characters without consuming what follows.
fn word(i: &str) -> ParseResult<&str, &str> {
    recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))(i)
}

/// Match `kw` case-insensitively, provided it is not the prefix of a longer word.
pub(crate) fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> ParseResult<&'a str, &'a str> {
    terminated(tag_no_case(kw), not(peek(alt((alphanumeric1, tag("_"))))))
}

/// Matches any reserved InfluxQL keyword.
pub(crate) fn sql_keyword(i: &str) -> ParseResult<&str, &str> {
    verify(word, |w: &str| {
        KEYWORDS.iter().any(|kw| kw.eq_ignore_ascii_case(w))
    })(i)
}
