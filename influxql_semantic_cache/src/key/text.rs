//! Escaping and scanning of semantic key text.
//!
//! Characters with structural meaning in a key are escaped with a backslash wherever they
//! appear inside a name or value, so the key can be split on unescaped delimiters.

use std::borrow::Cow;

/// Delimiters of the key structure, escaped everywhere.
const STRUCTURAL: &[char] = &['\\', ' ', ',', '(', ')', '{', '}', '#', '[', ']'];

/// Characters that start or form a comparison operator.
const OPERATOR: &[char] = &['=', '!', '<', '>', '~'];

/// Where a piece of text appears in a key, which decides what must be escaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Position {
    /// A measurement name, terminated by the first unescaped `.`.
    Measurement,
    /// Tag keys, field names, operands and literals.
    Name,
}

fn needs_escape(c: char, position: Position) -> bool {
    STRUCTURAL.contains(&c)
        || OPERATOR.contains(&c)
        || (position == Position::Measurement && c == '.')
}

pub(crate) fn escape(s: &str, position: Position) -> Cow<'_, str> {
    if !s.chars().any(|c| needs_escape(c, position)) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len() + 4);
    for c in s.chars() {
        if needs_escape(c, position) {
            out.push('\\');
        }
        out.push(c);
    }
    Cow::Owned(out)
}

/// Remove escaping backslashes. A trailing lone backslash is kept.
pub(crate) fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => out.push(next),
                None => out.push('\\'),
            },
            c => out.push(c),
        }
    }
    out
}

/// Byte offsets of every unescaped character of `s` matching `pred`.
pub(crate) fn unescaped_indices(
    s: &str,
    pred: impl Fn(char) -> bool,
) -> impl Iterator<Item = usize> {
    let mut escaped = false;
    s.char_indices().filter_map(move |(i, c)| {
        if escaped {
            escaped = false;
            return None;
        }
        if c == '\\' {
            escaped = true;
            return None;
        }
        pred(c).then_some(i)
    })
}

pub(crate) fn find_unescaped(s: &str, pred: impl Fn(char) -> bool) -> Option<usize> {
    unescaped_indices(s, pred).next()
}

pub(crate) fn rfind_unescaped(s: &str, pred: impl Fn(char) -> bool) -> Option<usize> {
    unescaped_indices(s, pred).last()
}

/// Split `s` on every unescaped `sep`.
pub(crate) fn split_unescaped(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    for i in unescaped_indices(s, |c| c == sep) {
        parts.push(&s[start..i]);
        start = i + sep.len_utf8();
    }
    parts.push(&s[start..]);
    parts
}

/// Returns the byte offset of the first unescaped operator character.
pub(crate) fn find_operator(s: &str) -> Option<usize> {
    find_unescaped(s, |c| OPERATOR.contains(&c))
}

/// Split a `(a)(b)(c)` sequence into the unescaped contents of each group.
///
/// Returns `None` if the text is not a well formed sequence of groups.
pub(crate) fn split_groups(s: &str) -> Option<Vec<&str>> {
    let mut groups = Vec::new();
    let mut rest = s;
    while !rest.is_empty() {
        rest = rest.strip_prefix('(')?;
        let end = find_unescaped(rest, |c| c == ')')?;
        groups.push(&rest[..end]);
        rest = &rest[end + 1..];
    }
    Some(groups)
}

/// Strip the enclosing braces of a `{...}` section.
pub(crate) fn braced(s: &str) -> Option<&str> {
    s.strip_prefix('{')?.strip_suffix('}')
}
