//! Call records and day grouping

use chrono::NaiveDate;
use echoaudit_common::api::CallEntry;
use echoaudit_common::dates::{day_label, parse_calendar_date, UNRECOGNIZED_DATE};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One recording of the selected agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallRecord {
    pub filename: String,
    /// Lexicographically sortable recency key; empty when unknown
    pub recorded_at_sort_key: String,
    pub display_time: String,
    /// Raw calendar date as supplied; `None` when missing or blank
    pub calendar_date: Option<String>,
    pub has_transcript: bool,
    pub has_report: bool,
}

impl From<CallEntry> for CallRecord {
    fn from(entry: CallEntry) -> Self {
        let calendar_date = entry
            .date
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        Self {
            recorded_at_sort_key: entry.sort_key.unwrap_or_default(),
            display_time: entry.time.unwrap_or_default(),
            filename: entry.filename,
            calendar_date,
            has_transcript: entry.has_transcript,
            has_report: entry.has_report,
        }
    }
}

/// Calls of one calendar day
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayGroup {
    /// Raw date key, or `UNRECOGNIZED_DATE`
    pub key: String,
    /// Human label, e.g. `Wed 01 May 2024`
    pub label: String,
    pub calls: Vec<CallRecord>,
}

impl DayGroup {
    pub fn is_unrecognized(&self) -> bool {
        self.key == UNRECOGNIZED_DATE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum GroupKey {
    /// Sorts before every recognized date (and so last when reversed)
    Unrecognized,
    Raw(String),
    Date(NaiveDate, String),
}

impl GroupKey {
    fn of(call: &CallRecord) -> Self {
        match call.calendar_date.as_deref() {
            None => GroupKey::Unrecognized,
            Some(raw) => match parse_calendar_date(raw) {
                Some(date) => GroupKey::Date(date, raw.to_string()),
                None => GroupKey::Raw(raw.to_string()),
            },
        }
    }
}

/// Group calls by calendar day
///
/// Groups are ordered newest day first with undated calls last. Within a
/// group calls are ordered by descending sort key; ties keep input order.
pub fn group_by_day(calls: &[CallRecord]) -> Vec<DayGroup> {
    let mut buckets: BTreeMap<GroupKey, Vec<CallRecord>> = BTreeMap::new();
    for call in calls {
        buckets
            .entry(GroupKey::of(call))
            .or_default()
            .push(call.clone());
    }

    buckets
        .into_iter()
        .rev()
        .map(|(key, mut calls)| {
            calls.sort_by(|a, b| descending(&a.recorded_at_sort_key, &b.recorded_at_sort_key));
            let (key, label) = match key {
                GroupKey::Unrecognized => (UNRECOGNIZED_DATE.to_string(), day_label(None)),
                GroupKey::Raw(raw) | GroupKey::Date(_, raw) => {
                    let label = day_label(Some(&raw));
                    (raw, label)
                }
            };
            DayGroup { key, label, calls }
        })
        .collect()
}

fn descending(a: &str, b: &str) -> Ordering {
    b.cmp(a)
}
