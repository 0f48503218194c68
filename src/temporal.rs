//! Year extraction and interval collapsing for work-location display.

use std::sync::OnceLock;

use chrono::{DateTime, Datelike};
use regex::Regex;

use crate::types::{EntityRecord, WorkLocationEntry};

fn leading_year() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s*([+-]?\d+)-").expect("static year regex"))
}

/// Year of an ISO-8601 timestamp.
///
/// Handles the service's irregular forms too: BCE years (`-0500-01-01T...`)
/// and unknown month/day (`1853-00-00T...`).
pub fn year_of(timestamp: Option<&str>) -> Option<i32> {
    let raw = timestamp?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.year());
    }
    leading_year()
        .captures(raw)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i32>().ok())
}

/// `(earliest, latest)` year across an entry's qualifiers.
pub fn entry_span(entry: &WorkLocationEntry) -> Option<(i32, i32)> {
    let years: Vec<i32> = [&entry.start_time, &entry.end_time, &entry.point_in_time]
        .into_iter()
        .filter_map(|t| year_of(t.as_deref()))
        .collect();
    let min = years.iter().copied().min()?;
    let max = years.iter().copied().max()?;
    Some((min, max))
}

/// Collapse the entries of one location into `"start-end[,start-end...]"`.
///
/// Overlapping or adjacent spans merge; output is sorted by start year.
/// Entries without any year are ignored.
pub fn collapse_intervals(entries: &[WorkLocationEntry]) -> String {
    let mut spans: Vec<(i32, i32)> = entries.iter().filter_map(entry_span).collect();
    spans.sort_unstable();

    let mut merged: Vec<(i32, i32)> = Vec::with_capacity(spans.len());
    for (start, end) in spans {
        match merged.last_mut() {
            Some(last) if start <= last.1.saturating_add(1) => {
                last.1 = last.1.max(end);
            }
            _ => merged.push((start, end)),
        }
    }

    merged
        .iter()
        .map(|(start, end)| format!("{}-{}", start, end))
        .collect::<Vec<_>>()
        .join(",")
}

/// Distinct work-location labels in first-seen order.
pub fn distinct_locations(record: &EntityRecord) -> Vec<String> {
    let mut places: Vec<String> = Vec::new();
    for entry in &record.work_locations {
        if !places.contains(&entry.location) {
            places.push(entry.location.clone());
        }
    }
    places
}

/// Per-location collapsed ranges; locations without any dated entry are left out.
pub fn location_ranges(record: &EntityRecord) -> Vec<(String, String)> {
    distinct_locations(record)
        .into_iter()
        .filter_map(|place| {
            let entries: Vec<WorkLocationEntry> = record
                .work_locations
                .iter()
                .filter(|e| e.location == place)
                .cloned()
                .collect();
            let ranges = collapse_intervals(&entries);
            if ranges.is_empty() {
                None
            } else {
                Some((place, ranges))
            }
        })
        .collect()
}
