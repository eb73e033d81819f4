//! Field limits and validation shared by records and backends.
//!
//! Validation is eager: setters reject bad input before it can reach a
//! canonical encoding.

use chrono::NaiveDateTime;

use crate::JacketError;

pub const ID_TEXT_MAX: usize = 128;
pub const TITLE_MAX: usize = 128;
pub const BODY_MAX: usize = 8192;
pub const TAG_MAX: usize = 128;
pub const NAME_MAX: usize = 255;
pub const USER_MAX: usize = 64;

/// Widest number the fixed-width state records can carry.
pub const NUM_DIGITS: usize = 9;
pub const NUM_MAX: u64 = 999_999_999;

/// Strftime-style layout of every time string in the system.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Byte length of a rendered time string.
pub const TIME_LEN: usize = 19;

fn has_control(text: &str) -> bool {
    text.chars().any(|c| c.is_control())
}

fn check_line(
    field: &'static str,
    text: &str,
    max: usize,
    forbidden: &[char],
) -> Result<(), JacketError> {
    if text.is_empty() {
        return Err(JacketError::limits(field, "must not be empty"));
    }

    if text.len() > max {
        return Err(JacketError::limits(
            field,
            format!("exceeds {max} bytes"),
        ));
    }

    if has_control(text) {
        return Err(JacketError::limits(field, "contains control characters"));
    }

    if let Some(bad) = text.chars().find(|c| forbidden.contains(c)) {
        return Err(JacketError::limits(
            field,
            format!("contains forbidden character {bad:?}"),
        ));
    }

    Ok(())
}

pub fn check_id_text(text: &str) -> Result<(), JacketError> {
    check_line("id_text", text, ID_TEXT_MAX, &[])
}

pub fn check_title(text: &str) -> Result<(), JacketError> {
    check_line("title", text, TITLE_MAX, &[])
}

pub fn check_user(text: &str) -> Result<(), JacketError> {
    check_line("user", text, USER_MAX, &[])
}

/// Attachment names additionally exclude path and glob characters.
pub fn check_name(text: &str) -> Result<(), JacketError> {
    check_line("name", text, NAME_MAX, &['/', '\\', '*', '?'])
}

/// Bodies allow any printable content plus ordinary whitespace.
pub fn check_body(text: &str) -> Result<(), JacketError> {
    if text.is_empty() {
        return Err(JacketError::limits("body", "must not be empty"));
    }

    if text.len() > BODY_MAX {
        return Err(JacketError::limits(
            "body",
            format!("exceeds {BODY_MAX} bytes"),
        ));
    }

    if text
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
    {
        return Err(JacketError::limits("body", "contains control characters"));
    }

    Ok(())
}

/// Validate and canonicalize a tag name.
///
/// A tag containing `:` is normalized to `prefix: suffix` with a single
/// space after the colon and surrounding whitespace stripped.
pub fn normalize_tag(tag: &str) -> Result<String, JacketError> {
    let tag = match tag.split_once(':') {
        Some((prefix, suffix)) => format!("{}: {}", prefix.trim(), suffix.trim()),
        None => tag.to_owned(),
    };

    check_line("tag", &tag, TAG_MAX, &['/', '\\', '*', '?'])?;

    if tag.starts_with('_') {
        return Err(JacketError::limits("tag", "must not start with underscore"));
    }

    Ok(tag)
}

/// Validate a `YYYY-MM-DD HH:MM:SS` time string, including calendar sanity.
pub fn check_time_str(text: &str) -> Result<(), JacketError> {
    let shape_ok = text.len() == TIME_LEN
        && text.bytes().enumerate().all(|(i, b)| match i {
            4 | 7 => b == b'-',
            10 => b == b' ',
            13 | 16 => b == b':',
            _ => b.is_ascii_digit(),
        });

    if !shape_ok || NaiveDateTime::parse_from_str(text, TIME_FORMAT).is_err() {
        return Err(JacketError::limits(
            "time",
            format!("not a valid time string {text:?}"),
        ));
    }

    Ok(())
}

/// Strict decimal parser for canonical encodings: no sign, no leading zeros.
pub fn parse_num(text: &str) -> Result<u64, JacketError> {
    let well_formed = !text.is_empty()
        && text.len() <= 19
        && text.bytes().all(|b| b.is_ascii_digit())
        && (text.len() == 1 || !text.starts_with('0'));

    if !well_formed {
        return Err(JacketError::corrupt(format!("malformed number {text:?}")));
    }

    text.parse()
        .map_err(|_| JacketError::corrupt(format!("malformed number {text:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_limits() {
        assert!(check_title("hello").is_ok());
        assert!(check_title("").is_err());
        assert!(check_title(&"x".repeat(TITLE_MAX)).is_ok());
        assert!(check_title(&"x".repeat(TITLE_MAX + 1)).is_err());
        assert!(check_title("a\nb").is_err());
    }

    #[test]
    fn body_allows_whitespace_only_control() {
        assert!(check_body("line one\nline two\ttabbed\r\n").is_ok());
        assert!(check_body("bell\x07").is_err());
        assert!(check_body(&"x".repeat(BODY_MAX + 1)).is_err());
    }

    #[test]
    fn tag_normalization() {
        assert_eq!(normalize_tag("plain").unwrap(), "plain");
        assert_eq!(normalize_tag("b:c").unwrap(), "b: c");
        assert_eq!(normalize_tag("  b  :  c  ").unwrap(), "b: c");
        assert_eq!(normalize_tag("b: c").unwrap(), "b: c");
    }

    #[test]
    fn tag_rejections() {
        assert!(normalize_tag("_hidden").is_err());
        assert!(normalize_tag("a/b").is_err());
        assert!(normalize_tag("a*b").is_err());
        assert!(normalize_tag("a?b").is_err());
        assert!(normalize_tag("a\\b").is_err());
        assert!(normalize_tag("").is_err());
    }

    #[test]
    fn name_rejects_path_characters() {
        assert!(check_name("report.pdf").is_ok());
        assert!(check_name("a/b").is_err());
        assert!(check_name(&"x".repeat(NAME_MAX + 1)).is_err());
    }

    #[test]
    fn time_strings() {
        assert!(check_time_str("2026-08-01 12:34:56").is_ok());
        assert!(check_time_str("2026-8-1 12:34:56").is_err());
        assert!(check_time_str("2026-02-30 00:00:00").is_err());
        assert!(check_time_str("2026-08-01T12:34:56").is_err());
        assert!(check_time_str("2026-08-01 12:34:5").is_err());
    }

    #[test]
    fn strict_numbers() {
        assert_eq!(parse_num("0").unwrap(), 0);
        assert_eq!(parse_num("42").unwrap(), 42);
        assert!(parse_num("042").is_err());
        assert!(parse_num("").is_err());
        assert!(parse_num("-1").is_err());
        assert!(parse_num("1 2").is_err());
    }
}
