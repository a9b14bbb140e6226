//! Point queries against the cached tide month
//!
//! `TideQueryService` is the single entry point used by both the CLI and the
//! HTTP API: it makes sure the cache is fresh, loads it, and answers "tides
//! for date D" along with the next-tide computation in the target timezone.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{sort_events, EventStatus, MonthCache, PageFetcher, TableExtractor, TideDayRecord, TideEvent};
use crate::cache::{RefreshError, TideCache};

/// Format of day keys and date arguments
pub const DATE_KEY_FORMAT: &str = "%d%m%y";

/// Errors returned by tide queries
#[derive(Debug, Error)]
pub enum QueryError {
    /// The requested date is not a `DDMMYY` string
    #[error("Invalid tides date: '{0}' (expected DDMMYY)")]
    InvalidDate(String),

    /// No usable record for the date
    #[error("No tide data for {0}")]
    NotFound(String),

    /// The cache could not be rebuilt
    #[error(transparent)]
    Refresh(#[from] RefreshError),
}

/// Answers tide queries from the cache, refreshing it first when needed
#[derive(Debug)]
pub struct TideQueryService {
    cache: TideCache,
    fetcher: Mutex<PageFetcher>,
    extractor: TableExtractor,
    max_age_minutes: u64,
    use_cache: bool,
}

impl TideQueryService {
    /// Creates a service reading `cache` and refreshing it with `fetcher`
    /// whenever the artifact is older than `max_age_minutes`
    pub fn new(cache: TideCache, fetcher: PageFetcher, max_age_minutes: u64) -> Self {
        Self {
            cache,
            fetcher: Mutex::new(fetcher),
            extractor: TableExtractor::new(),
            max_age_minutes,
            use_cache: true,
        }
    }

    /// When disabled, every query reloads the page before reading the cache
    pub fn with_cache_reuse(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn cache(&self) -> &TideCache {
        &self.cache
    }

    pub fn timezone(&self) -> Tz {
        self.cache.timezone()
    }

    /// Current wall-clock time in the target timezone
    pub fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.timezone())
    }

    /// Today's `DDMMYY` key in the target timezone
    pub fn today_key(&self) -> String {
        self.now().format(DATE_KEY_FORMAT).to_string()
    }

    /// Rebuilds the cache if needed. Returns `true` if it was rebuilt.
    pub async fn ensure_fresh(&self) -> Result<bool, RefreshError> {
        let mut fetcher = self.fetcher.lock().await;
        if self.use_cache {
            self.cache
                .ensure_fresh(&mut fetcher, &self.extractor, self.max_age_minutes)
                .await
        } else {
            self.cache.refresh(&mut fetcher, &self.extractor).await?;
            Ok(true)
        }
    }

    /// Returns the record for `date`, refreshing the cache first if needed.
    ///
    /// # Arguments
    /// * `date` - Day key in `DDMMYY` form
    ///
    /// # Returns
    /// * `Ok(record)` with the day's nine fields
    /// * `Err(InvalidDate)` if `date` is not six digits, before any I/O
    /// * `Err(NotFound)` if the cached month has no such day
    /// * `Err(Refresh)` if the cache had to be rebuilt and that failed
    pub async fn lookup(&self, date: &str) -> Result<TideDayRecord, QueryError> {
        let key = validate_date_key(date)?;
        let month = self.month(key).await?;
        record_for(&month, key)
    }

    /// Returns the real tides of `date` sorted by time of day.
    pub async fn summarize(&self, date: &str) -> Result<Vec<TideEvent>, QueryError> {
        let record = self.lookup(date).await?;
        Ok(sorted_events(&record))
    }

    /// Sorted tides of `date`, each marked relative to the current time in
    /// the target timezone.
    pub async fn schedule(&self, date: &str) -> Result<Vec<(TideEvent, EventStatus)>, QueryError> {
        let events = self.summarize(date).await?;
        let day = parse_date(date)?;
        Ok(annotate(events, day, self.now()))
    }

    /// The next tide from now, looking at today and then tomorrow.
    ///
    /// Tomorrow is only available while it belongs to the cached month.
    pub async fn next_tide(&self) -> Result<Option<(NaiveDate, TideEvent)>, QueryError> {
        let now = self.now();
        let today = now.format(DATE_KEY_FORMAT).to_string();
        let month = self.month(&today).await?;
        Ok(next_tide_in(&month, now))
    }

    async fn month(&self, key: &str) -> Result<MonthCache, QueryError> {
        self.ensure_fresh().await?;
        self.cache.load().ok_or_else(|| {
            warn!(path = %self.cache.path().display(), "Tide cache unavailable");
            QueryError::NotFound(key.to_string())
        })
    }
}

/// Checks that `date` has the `DDMMYY` shape of a day key.
///
/// Calendar validity is not checked here: an impossible date simply has no
/// record.
pub fn validate_date_key(date: &str) -> Result<&str, QueryError> {
    if date.len() == 6 && date.bytes().all(|b| b.is_ascii_digit()) {
        Ok(date)
    } else {
        Err(QueryError::InvalidDate(date.to_string()))
    }
}

/// Parses a `DDMMYY` string into a calendar date
pub fn parse_date(date: &str) -> Result<NaiveDate, QueryError> {
    let key = validate_date_key(date)?;
    NaiveDate::parse_from_str(key, DATE_KEY_FORMAT)
        .map_err(|_| QueryError::InvalidDate(date.to_string()))
}

/// Fetches and validates the record stored under `key`
pub fn record_for(month: &MonthCache, key: &str) -> Result<TideDayRecord, QueryError> {
    let fields = month.get(key).ok_or_else(|| {
        debug!(date = %key, "No record for date");
        QueryError::NotFound(key.to_string())
    })?;
    TideDayRecord::from_fields(key, fields).ok_or_else(|| {
        warn!(date = %key, fields = fields.len(), "Malformed tide record");
        QueryError::NotFound(key.to_string())
    })
}

/// The record's real tides sorted by time of day
pub fn sorted_events(record: &TideDayRecord) -> Vec<TideEvent> {
    let mut events = record.events();
    sort_events(&mut events);
    events
}

/// Marks sorted events of `date` relative to `now`.
///
/// Past dates are all elapsed and future dates all upcoming. On the current
/// date, events before `now` are elapsed and the first one at or after
/// `now` is the next tide.
pub fn annotate(
    events: Vec<TideEvent>,
    date: NaiveDate,
    now: DateTime<Tz>,
) -> Vec<(TideEvent, EventStatus)> {
    let today = now.date_naive();
    if date < today {
        return events.into_iter().map(|e| (e, EventStatus::Elapsed)).collect();
    }
    if date > today {
        return events.into_iter().map(|e| (e, EventStatus::Upcoming)).collect();
    }

    let now_time = now.time();
    let mut next_seen = false;
    events
        .into_iter()
        .map(|event| {
            let status = match event_time(&event) {
                Some(t) if t < now_time => EventStatus::Elapsed,
                Some(_) if !next_seen => {
                    next_seen = true;
                    EventStatus::Next
                }
                _ => EventStatus::Upcoming,
            };
            (event, status)
        })
        .collect()
}

/// The first tide at or after `now`, today or tomorrow, found in `month`
pub fn next_tide_in(month: &MonthCache, now: DateTime<Tz>) -> Option<(NaiveDate, TideEvent)> {
    let today = now.date_naive();

    let todays = day_events(month, today);
    if let Some((event, _)) = annotate(todays, today, now)
        .into_iter()
        .find(|(_, status)| *status == EventStatus::Next)
    {
        return Some((today, event));
    }

    let tomorrow = today.succ_opt()?;
    day_events(month, tomorrow)
        .into_iter()
        .next()
        .map(|event| (tomorrow, event))
}

fn day_events(month: &MonthCache, date: NaiveDate) -> Vec<TideEvent> {
    let key = date.format(DATE_KEY_FORMAT).to_string();
    record_for(month, &key)
        .map(|record| sorted_events(&record))
        .unwrap_or_default()
}

fn event_time(event: &TideEvent) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(&event.time, "%H:%M").ok()
}
