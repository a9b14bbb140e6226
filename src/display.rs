//! Plain-text rendering of a day's tides for the CLI

use std::fmt::Write;

use chrono::NaiveDate;

use crate::data::query::DATE_KEY_FORMAT;
use crate::data::{EventStatus, TideDayRecord, TideEvent};

/// Verbose rendering: a heading and one line per tide in time order.
///
/// The next tide is flagged with `*`; tides that already happened are
/// flagged as past.
///
/// # Arguments
/// * `date_key` - The `DDMMYY` key of the day, used for the heading
/// * `schedule` - The day's sorted tides with their status
pub fn render_day(date_key: &str, schedule: &[(TideEvent, EventStatus)]) -> String {
    let mut out = String::new();
    match NaiveDate::parse_from_str(date_key, DATE_KEY_FORMAT) {
        Ok(date) => {
            let _ = writeln!(out, "Tides for date: {}", date.format("%a %d %b, %Y"));
        }
        Err(_) => {
            let _ = writeln!(out, "Tides for date: {}", date_key);
        }
    }

    for (event, status) in schedule {
        let marker = match status {
            EventStatus::Next => " *",
            EventStatus::Elapsed => " (past)",
            EventStatus::Upcoming => "",
        };
        let _ = writeln!(
            out,
            "{:<19}: {:6}({}){}",
            event.kind.label(),
            event.time,
            event.height,
            marker
        );
    }
    out
}

/// Line announcing the next tide when it falls on another day
pub fn render_next_tide(date: NaiveDate, event: &TideEvent) -> String {
    format!(
        "Next tide: {} at {} ({}) on {}",
        event.kind.label(),
        event.time,
        event.height,
        date.format("%a %d %b")
    )
}

/// Terse rendering: the record's nine raw fields as a JSON array
pub fn render_fields(record: &TideDayRecord) -> serde_json::Result<String> {
    serde_json::to_string(record.fields())
}
