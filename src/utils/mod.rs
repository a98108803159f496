//! Shared utility functions.

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a timestamp as ISO-8601 UTC with a trailing `Z`.
///
/// Precision is fixed at microseconds so that lexical order of the stored
/// strings matches chronological order.
pub fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Current time formatted with [`format_timestamp`].
pub fn utc_now_iso() -> String {
    format_timestamp(Utc::now())
}

/// Parse a timestamp written by [`format_timestamp`].
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

/// Make an identifier safe to use as a file stem.
///
/// Reserved and control characters become `_`.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed = sanitized.trim().trim_matches('_');
    let limited: String = trimmed.chars().take(100).collect();

    if limited.is_empty() {
        "document".to_string()
    } else {
        limited
    }
}
