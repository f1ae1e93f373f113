//! Date parsing for rules and snippets.
//!
//! Formats come from the portal configuration in dayjs token syntax
//! (`DD.MM.YYYY`, `YYYY-MM-DD HH:mm:ss`, ...) and are translated into
//! chrono format strings before parsing.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::value::Value;

const TOKENS: &[(&str, &str)] = &[
    ("YYYY", "%Y"),
    ("YY", "%y"),
    ("MMMM", "%B"),
    ("MMM", "%b"),
    ("MM", "%m"),
    ("M", "%m"),
    ("DD", "%d"),
    ("D", "%d"),
    ("HH", "%H"),
    ("H", "%H"),
    ("hh", "%I"),
    ("h", "%I"),
    ("mm", "%M"),
    ("m", "%M"),
    ("ss", "%S"),
    ("s", "%S"),
    ("SSS", "%3f"),
    ("A", "%p"),
    ("a", "%p"),
];

/// Translates a dayjs pattern into a chrono format string.
///
/// Text in square brackets is copied literally, as dayjs does.
pub fn to_chrono_format(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut rest = pattern;
    'outer: while let Some(c) = rest.chars().next() {
        if c == '[' {
            if let Some(end) = rest.find(']') {
                out.push_str(&rest[1..end].replace('%', "%%"));
                rest = &rest[end + 1..];
                continue;
            }
        }
        for (token, replacement) in TOKENS {
            if rest.starts_with(token) {
                out.push_str(replacement);
                rest = &rest[token.len()..];
                continue 'outer;
            }
        }
        if c == '%' {
            out.push_str("%%");
        } else {
            out.push(c);
        }
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Parses `input` with a dayjs `pattern`.
///
/// Patterns without a time part yield midnight, patterns without a date
/// part are not dates and yield `None`.
pub fn parse_date_str(input: &str, pattern: &str) -> Option<NaiveDateTime> {
    let input = input.trim();
    if input.is_empty() || pattern.is_empty() {
        return None;
    }
    let fmt = to_chrono_format(pattern);
    if let Ok(dt) = NaiveDateTime::parse_from_str(input, &fmt) {
        return Some(dt);
    }
    NaiveDate::parse_from_str(input, &fmt)
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

/// Parses a JSON value as a date. Only strings can be dates.
pub fn parse_date(value: &Value, pattern: &str) -> Option<NaiveDateTime> {
    match value {
        Value::String(s) => parse_date_str(s, pattern),
        _ => None,
    }
}
