//! # Parse the subset of [InfluxQL] `SELECT` statements handled by the cache
//!
//! [InfluxQL]: https://docs.influxdata.com/influxdb/v1.8/query_language

pub use expression::*;
pub use identifier::Identifier;
pub use literal::{Duration, Literal};
pub use select::*;
pub use string::Regex;
pub use walk::*;

use crate::parser::internal::Error as InternalError;
use nom::Offset;
use nom::character::complete::{char, multispace0};
use nom::combinator::{eof, opt};
use nom::sequence::tuple;
use std::fmt::{Display, Formatter};

#[cfg(test)]
mod test_util;

mod expression;
mod identifier;
mod internal;
mod keywords;
mod literal;
mod select;
mod string;
mod walk;

/// An error returned when parsing an InfluxQL query using [`parse_select`] fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    message: String,
    pos: usize,
}

impl ParseError {
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The byte offset into the input at which parsing failed.
    pub fn pos(&self) -> usize {
        self.pos
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at pos {}", self.message, self.pos)
    }
}

impl std::error::Error for ParseError {}

/// Parse the input as a single `SELECT` statement, optionally terminated by `;`.
pub fn parse_select(input: &str) -> Result<SelectStatement, ParseError> {
    let res = select::select_statement(input).and_then(|(i, stmt)| {
        internal::expect(
            "invalid SELECT statement, unexpected input",
            tuple((multispace0, opt(char(';')), multispace0, eof)),
        )(i)
        .map(|(i, _)| (i, stmt))
    });

    match res {
        Ok((_, stmt)) => Ok(stmt),
        Err(nom::Err::Failure(InternalError::Syntax {
            input: pos,
            message,
        })) => Err(ParseError {
            message: message.into(),
            pos: input.offset(pos),
        }),
        Err(nom::Err::Error(InternalError::Nom(pos, _)))
        | Err(nom::Err::Failure(InternalError::Nom(pos, _))) => Err(ParseError {
            message: "invalid SELECT statement".into(),
            pos: input.offset(pos),
        }),
        Err(_) => Err(ParseError {
            message: "invalid SELECT statement".into(),
            pos: 0,
        }),
    }
}
