//! Internal result and error types used to build the InfluxQL parsers
//!
use nom::Parser;
use nom::error::{ErrorKind as NomErrorKind, ParseError as NomParseError};
use std::fmt::{Display, Formatter};

/// Implemented by error types that can carry a user-facing message, as required by
/// [`map_fail`] and [`expect`].
pub(crate) trait ParseError<'a>: NomParseError<&'a str> + Sized {
    fn from_message(input: &'a str, message: &'static str) -> Self;
}

/// An internal error type used to build InfluxQL parsers.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Error<I> {
    Syntax { input: I, message: &'static str },
    Nom(I, NomErrorKind),
}

impl<I: Display> Display for Error<I> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Syntax { input: _, message } => write!(f, "Syntax error: {message}"),
            Self::Nom(_, kind) => write!(f, "nom error: {kind:?}"),
        }
    }
}

impl<'a> ParseError<'a> for Error<&'a str> {
    fn from_message(input: &'a str, message: &'static str) -> Self {
        Self::Syntax { input, message }
    }
}

/// Applies a fallible conversion `f` over the result of `parser`, mapping a conversion
/// failure to an unrecoverable [`nom::Err::Failure`] carrying `message`.
pub(crate) fn map_fail<'a, O1, O2, E: ParseError<'a>, E2, F, G>(
    message: &'static str,
    mut parser: F,
    mut f: G,
) -> impl FnMut(&'a str) -> ParseResult<&'a str, O2, E>
where
    F: Parser<&'a str, O1, E>,
    G: FnMut(O1) -> Result<O2, E2>,
{
    move |input| {
        let (remaining, o1) = parser.parse(input)?;
        match f(o1) {
            Ok(o2) => Ok((remaining, o2)),
            Err(_) => Err(nom::Err::Failure(E::from_message(input, message))),
        }
    }
}

/// Transforms a [`nom::Err::Error`] to a [`nom::Err::Failure`] using `message` for additional
/// context.
pub(crate) fn expect<'a, E: ParseError<'a>, F, O>(
    message: &'static str,
    mut f: F,
) -> impl FnMut(&'a str) -> ParseResult<&'a str, O, E>
where
    F: Parser<&'a str, O, E>,
{
    move |i| match f.parse(i) {
        Ok(o) => Ok(o),
        Err(nom::Err::Incomplete(i)) => Err(nom::Err::Incomplete(i)),
        Err(nom::Err::Error(_)) => Err(nom::Err::Failure(E::from_message(i, message))),
        Err(nom::Err::Failure(e)) => Err(nom::Err::Failure(e)),
    }
}

impl<I> NomParseError<I> for Error<I> {
    fn from_error_kind(input: I, kind: NomErrorKind) -> Self {
        Self::Nom(input, kind)
    }

    fn append(_: I, _: NomErrorKind, other: Self) -> Self {
        other
    }
}

/// ParseResult is a type alias for [`nom::IResult`] used by nom combinator
/// functions for parsing InfluxQL.
pub(crate) type ParseResult<I, T, E = Error<I>> = nom::IResult<I, T, E>;
