//! Core data models for tidewatch
//!
//! A cached month of tide tables is a map from `DDMMYY` day keys to the nine
//! raw fields scraped for that day. Everything else in the crate either
//! produces that map (fetcher, extractor) or reads it (query service).

pub mod extract;
pub mod fetcher;
pub mod query;

pub use extract::{ParseError, TableExtractor};
pub use fetcher::{FetchError, PageFetcher, RawPage, RequestCookieJar};
pub use query::{QueryError, TideQueryService};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One month of tide data keyed by `DDMMYY`.
///
/// All keys of a month share the same `MMYY` suffix, so the map's key order
/// is the ascending day order of the scraped table.
pub type MonthCache = BTreeMap<String, Vec<String>>;

/// Number of fields in a day row: the day of month followed by four
/// (time, height) pairs.
pub const FIELD_COUNT: usize = 9;

/// Time (and height) value used by the upstream table when a tide does not
/// occur on a given day.
pub const PHANTOM: &str = "-";

/// The four tide slots of a day, in the column order of the upstream table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TideKind {
    FirstHigh,
    SecondHigh,
    FirstLow,
    SecondLow,
}

impl TideKind {
    /// All slots in column order
    pub const ALL: [TideKind; 4] = [
        TideKind::FirstHigh,
        TideKind::SecondHigh,
        TideKind::FirstLow,
        TideKind::SecondLow,
    ];

    /// Index of the slot's time field within a day record; the height
    /// follows immediately after.
    pub fn time_index(self) -> usize {
        match self {
            TideKind::FirstHigh => 1,
            TideKind::SecondHigh => 3,
            TideKind::FirstLow => 5,
            TideKind::SecondLow => 7,
        }
    }

    /// Human-readable label used by the CLI
    pub fn label(self) -> &'static str {
        match self {
            TideKind::FirstHigh => "1st High Tide",
            TideKind::SecondHigh => "2nd High Tide",
            TideKind::FirstLow => "1st Low Tide",
            TideKind::SecondLow => "2nd Low Tide",
        }
    }

    /// Short code (`1H`, `2H`, `1L`, `2L`)
    pub fn code(self) -> &'static str {
        match self {
            TideKind::FirstHigh => "1H",
            TideKind::SecondHigh => "2H",
            TideKind::FirstLow => "1L",
            TideKind::SecondLow => "2L",
        }
    }

    pub fn is_high(self) -> bool {
        matches!(self, TideKind::FirstHigh | TideKind::SecondHigh)
    }
}

/// A single tide of a day: when, how high, and which slot it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TideEvent {
    /// Time of day as printed upstream (`HH:MM`)
    pub time: String,
    /// Height as printed upstream (centimetres)
    pub height: String,
    /// Slot the event was read from
    pub kind: TideKind,
}

/// Position of a tide event relative to "now" in the target timezone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventStatus {
    /// The tide already happened
    Elapsed,
    /// First tide of today at or after the current time
    Next,
    /// Later today, or on a future date
    Upcoming,
}

/// One calendar day's tide data, guaranteed to hold exactly nine fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TideDayRecord {
    date_key: String,
    fields: [String; FIELD_COUNT],
}

impl TideDayRecord {
    /// Builds a record from a cached field list.
    ///
    /// Returns `None` unless `fields` has exactly [`FIELD_COUNT`] entries.
    pub fn from_fields(date_key: impl Into<String>, fields: &[String]) -> Option<Self> {
        let fields: [String; FIELD_COUNT] = fields.to_vec().try_into().ok()?;
        Some(Self {
            date_key: date_key.into(),
            fields,
        })
    }

    pub fn date_key(&self) -> &str {
        &self.date_key
    }

    pub fn fields(&self) -> &[String; FIELD_COUNT] {
        &self.fields
    }

    /// Day of month as printed in the table
    pub fn day(&self) -> &str {
        &self.fields[0]
    }

    /// Raw (time, height) pair for a slot
    pub fn slot(&self, kind: TideKind) -> (&str, &str) {
        let i = kind.time_index();
        (&self.fields[i], &self.fields[i + 1])
    }

    /// The day's real tides in column order; phantom slots are left out.
    pub fn events(&self) -> Vec<TideEvent> {
        TideKind::ALL
            .iter()
            .filter_map(|&kind| {
                let (time, height) = self.slot(kind);
                let time = normalize_field(time);
                if time == PHANTOM {
                    return None;
                }
                Some(TideEvent {
                    time,
                    height: normalize_field(height),
                    kind,
                })
            })
            .collect()
    }
}

/// Sorts events by their literal `HH:MM` time; ties keep their slot order.
pub fn sort_events(events: &mut [TideEvent]) {
    events.sort_by(|a, b| a.time.cmp(&b.time));
}

/// Folds compatibility whitespace (non-breaking spaces and friends) to a
/// plain space and strips leading whitespace.
pub fn normalize_field(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect::<String>()
        .trim_start()
        .to_string()
}
