//! Date and period labels

use chrono::NaiveDate;

/// Label used for calls whose date is missing or unparseable
pub const UNRECOGNIZED_DATE: &str = "Unrecognized date";

/// Parse a `YYYY-MM-DD` calendar date
pub fn parse_calendar_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}

/// Human label for a calendar date, e.g. `Wed 01 May 2024`
///
/// Unparseable but non-empty input is shown as-is.
pub fn day_label(raw: Option<&str>) -> String {
    match raw.map(str::trim) {
        Some(s) if !s.is_empty() => match parse_calendar_date(s) {
            Some(date) => date.format("%a %d %b %Y").to_string(),
            None => s.to_string(),
        },
        _ => UNRECOGNIZED_DATE.to_string(),
    }
}

/// Human label for a period key `START_END`, e.g. `2024-05-06 — 2024-05-12`
pub fn period_label(key: &str) -> String {
    match key.split_once('_') {
        Some((start, end)) => format!("{start} — {end}"),
        None => key.to_string(),
    }
}
