//! Parse delimited string inputs.
//!

// Adapted from https://github.com/Geal/nom/blob/main/examples/string.rs for InfluxQL.

use crate::parser::internal::ParseResult;
use nom::Parser;
use nom::branch::alt;
use nom::bytes::complete::{is_not, tag};
use nom::character::complete::char;
use nom::combinator::{map, value, verify};
use nom::multi::fold_many0;
use nom::sequence::{delimited, preceded};
use std::fmt::{Display, Formatter, Write};

/// Writes `s` to `f`, mapping any characters from => to their escaped equivalents.
#[macro_export]
macro_rules! write_escaped {
    ($f: expr, $s: expr $(, $from:expr => $to:expr)+) => {
        for c in $s.chars() {
            match c {
                $(
                $from => $f.write_str($to)?,
                )+
                _ => $f.write_char(c)?,
            }
        }
    };
}

/// A fragment of a string being parsed: either a non-empty run of unescaped characters or a
/// single escaped character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StringFragment<'a> {
    Literal(&'a str),
    EscapedChar(char),
}

/// Parse a single-quoted literal string.
pub(crate) fn single_quoted_string(i: &str) -> ParseResult<&str, String> {
    let escaped = preceded(
        char('\\'),
        alt((char('\\'), char('\''), value('\n', char('n')))),
    );

    string(
        '\'',
        verify(is_not("'\\\n"), |s: &str| !s.is_empty()),
        escaped,
    )(i)
}

/// Parse a double-quoted identifier string.
pub(crate) fn double_quoted_string(i: &str) -> ParseResult<&str, String> {
    let escaped = preceded(
        char('\\'),
        alt((char('\\'), char('"'), value('\n', char('n')))),
    );

    string(
        '"',
        verify(is_not("\"\\\n"), |s: &str| !s.is_empty()),
        escaped,
    )(i)
}

fn string<'a, T, U>(
    delimiter: char,
    literal: T,
    escaped: U,
) -> impl FnMut(&'a str) -> ParseResult<&'a str, String>
where
    T: Parser<&'a str, &'a str, crate::parser::internal::Error<&'a str>>,
    U: Parser<&'a str, char, crate::parser::internal::Error<&'a str>>,
{
    let fragment = alt((
        map(literal, StringFragment::Literal),
        map(escaped, StringFragment::EscapedChar),
    ));

    let build_string = fold_many0(fragment, String::new, |mut string, fragment| {
        match fragment {
            StringFragment::Literal(s) => string.push_str(s),
            StringFragment::EscapedChar(ch) => string.push(ch),
        }
        string
    });

    delimited(char(delimiter), build_string, char(delimiter))
}

/// Parse regular expression literal characters.
///
/// Consumes `i` until reaching an escaped delimiter (`\/`), newline or eof.
fn regex_literal(i: &str) -> ParseResult<&str, &str> {
    let mut remaining = i;
    let mut consumed = &i[..0];

    loop {
        // match everything except `\`, `/` or `\n`
        let (_, match_i) = is_not("\\/\n")(remaining)?;
        consumed = &i[..(consumed.len() + match_i.len())];
        remaining = &i[consumed.len()..];

        // Try and consume '\' followed by a '/'
        if let Ok((remaining_i, _)) = char::<_, nom::error::Error<&str>>('\\')(remaining) {
            if char::<_, nom::error::Error<&str>>('/')(remaining_i).is_ok() {
                // Escaped delimiter: let the outer parser match and unescape it
                return Ok((remaining, consumed));
            }
            // Skip the '\' and continue consuming
            consumed = &i[..consumed.len() + 1];
            remaining = &i[consumed.len()..];
        } else {
            return Ok((remaining, consumed));
        }
    }
}

/// An unescaped regular expression.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Regex(pub(crate) String);

impl Regex {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Regex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_char('/')?;
        write_escaped!(f, self.0, '/' => "\\/");
        f.write_char('/')?;
        Ok(())
    }
}

impl From<String> for Regex {
    fn from(v: String) -> Self {
        Self(v)
    }
}

impl From<&str> for Regex {
    fn from(v: &str) -> Self {
        Self(v.into())
    }
}

/// Parse a regular expression, delimited by `/`.
pub(crate) fn regex(i: &str) -> ParseResult<&str, Regex> {
    map(string('/', regex_literal, map(tag("\\/"), |_| '/')), Regex)(i)
}

/// Writes `s` as a single-quoted InfluxQL string literal.
pub(crate) fn write_single_quoted(f: &mut Formatter<'_>, s: &str) -> std::fmt::Result {
    f.write_char('\'')?;
    write_escaped!(f, s, '\n' => "\\n", '\\' => "\\\\", '\'' => "\\'");
    f.write_char('\'')
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_double_quoted_string() {
        // ascii
        let (_, got) = double_quoted_string(r#""water level""#).unwrap();
        assert_eq!(got, "water level");

        // unicode
        let (_, got) = double_quoted_string("\"water level\u{1f30a}\"").unwrap();
        assert_eq!(got, "water level\u{1f30a}");

        // escaped characters
        let (_, got) = double_quoted_string(r#""\n\\\"""#).unwrap();
        assert_eq!(got, "\n\\\"");

        // literal tab
        let (_, got) = double_quoted_string("\"water\tlevel\"").unwrap();
        assert_eq!(got, "water\tlevel");

        // Fallible cases

        // Not terminated
        double_quoted_string(r#""water level"#).unwrap_err();

        // Literal newline
        double_quoted_string("\"water\nlevel\"").unwrap_err();

        // Invalid escape
        double_quoted_string(r#""water\ilevel""#).unwrap_err();
    }

    #[test]
    fn test_single_quoted_string() {
        let (_, got) = single_quoted_string("'coyote_creek'").unwrap();
        assert_eq!(got, "coyote_creek");

        // escaped characters
        let (_, got) = single_quoted_string(r#"'\n\''"#).unwrap();
        assert_eq!(got, "\n'");

        // empty
        let (_, got) = single_quoted_string("''").unwrap();
        assert_eq!(got, "");

        // Fallible cases

        // Not terminated
        single_quoted_string("'santa_monica").unwrap_err();

        // Invalid escape
        single_quoted_string(r#"'santa\imonica'"#).unwrap_err();
    }

    #[test]
    fn test_regex() {
        let (_, got) = regex("/coyote/").unwrap();
        assert_eq!(got, "coyote".into());

        // handle escaped delimiters "\/"
        let (_, got) = regex(r#"/this\/is\/a\/path/"#).unwrap();
        assert_eq!(got, "this/is/a/path".into());

        // ignores any other possible escape sequence
        let (_, got) = regex(r#"/^santa\.monica$/"#).unwrap();
        assert_eq!(got, r#"^santa\.monica$"#.into());

        // Empty regex
        let (_, got) = regex("//").unwrap();
        assert_eq!(got, "".into());

        // Display re-escapes the delimiter
        assert_eq!(Regex::from("a/b").to_string(), r#"/a\/b/"#);

        // Fallible cases

        // Missing trailing delimiter
        regex("/coyote").unwrap_err();

        // Embedded newline
        regex("/coyote\ncreek/").unwrap_err();
    }
}
