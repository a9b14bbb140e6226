//! Tide cache artifact on disk
//!
//! Provides a `TideCache` that owns the single JSON file holding the cached
//! month. Freshness is judged from the file's modification time; a stale
//! artifact is deleted and rebuilt from the upstream page.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use directories::ProjectDirs;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::data::extract::month_label;
use crate::data::{FetchError, MonthCache, PageFetcher, ParseError, TableExtractor};

/// File name of the cache artifact
pub const CACHE_FILE_NAME: &str = ".tides.metservice.json";

/// Default maximum artifact age in minutes (one day)
pub const DEFAULT_MAX_AGE_MINUTES: u64 = 60 * 24;

/// Errors that can occur while rebuilding the cache
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Failed to fetch tide page: {0}")]
    Fetch(#[from] FetchError),

    #[error("Failed to parse tide page: {0}")]
    Parse(#[from] ParseError),

    #[error("Cache file error: {0}")]
    Io(#[from] io::Error),
}

/// Owns the lifecycle of the cache artifact: create, read, delete.
///
/// Cloning a `TideCache` only clones its path, so the refresh task and the
/// query path each hold their own handle; the file is the only thing they
/// share.
#[derive(Debug, Clone)]
pub struct TideCache {
    path: PathBuf,
    timezone: Tz,
}

impl TideCache {
    /// Creates a cache next to the running executable.
    ///
    /// Falls back to the XDG cache directory (`~/.cache/tidewatch/` on Linux)
    /// when the executable's location is unknown. Returns `None` if neither
    /// can be determined.
    pub fn new(timezone: Tz) -> Option<Self> {
        let dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .or_else(|| {
                ProjectDirs::from("", "", "tidewatch").map(|d| d.cache_dir().to_path_buf())
            })?;
        Some(Self::with_path(dir.join(CACHE_FILE_NAME), timezone))
    }

    /// Creates a cache stored at a specific path
    pub fn with_path(path: PathBuf, timezone: Tz) -> Self {
        Self { path, timezone }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Modification time of the artifact, if it exists
    pub fn modified_at(&self) -> Option<DateTime<Utc>> {
        let modified = fs::metadata(&self.path).and_then(|m| m.modified()).ok()?;
        Some(DateTime::<Utc>::from(modified))
    }

    /// True if the artifact is missing or older than `max_age_minutes`
    pub fn is_stale(&self, max_age_minutes: u64) -> bool {
        self.is_stale_at(max_age_minutes, SystemTime::now())
    }

    /// Staleness as seen at `now`. An artifact exactly `max_age_minutes`
    /// old is still fresh.
    pub fn is_stale_at(&self, max_age_minutes: u64, now: SystemTime) -> bool {
        let Ok(modified) = fs::metadata(&self.path).and_then(|m| m.modified()) else {
            return true;
        };
        let max_age = Duration::from_secs(max_age_minutes.saturating_mul(60));
        match now.duration_since(modified) {
            Ok(age) => age > max_age,
            // Modified in the future: treat as fresh
            Err(_) => false,
        }
    }

    /// Deletes the artifact. Missing files are not an error.
    pub fn invalidate(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Removed cache file");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Reads the cached month.
    ///
    /// Returns `None` if the file is missing, unreadable or malformed.
    pub fn load(&self) -> Option<MonthCache> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Unable to open cache file");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(month) => Some(month),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Malformed cache file");
                None
            }
        }
    }

    /// Replaces the artifact with `month`.
    ///
    /// The JSON is written to a uniquely named temporary file in the same
    /// directory and persisted over the artifact, so readers see either the
    /// old or the new document and concurrent writers never share a file.
    ///
    /// # Arguments
    /// * `month` - The day records to store, keyed by `DDMMYY`
    ///
    /// # Returns
    /// * `Ok(())` on success
    /// * `Err` if directory creation, writing or the final rename fails
    pub fn save(&self, month: &MonthCache) -> io::Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let json = serde_json::to_string_pretty(month)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.persist(&self.path)?;
        debug!(path = %self.path.display(), entries = month.len(), "Saved cache file");
        Ok(())
    }

    /// Fetches, parses and saves the current month unconditionally.
    ///
    /// A month with no day rows is rejected and the existing artifact is
    /// left untouched. Returns the number of days saved.
    pub async fn refresh(
        &self,
        fetcher: &mut PageFetcher,
        extractor: &TableExtractor,
    ) -> Result<usize, RefreshError> {
        let page = fetcher.fetch().await?;
        let today = Utc::now().with_timezone(&self.timezone).date_naive();
        let month = extractor.extract(&page.body, today)?;
        if month.is_empty() {
            return Err(ParseError::NoDayRows {
                month: month_label(today),
            }
            .into());
        }
        self.save(&month)?;
        info!(entries = month.len(), fetched_at = %page.fetched_at, "Tide cache updated");
        Ok(month.len())
    }

    /// Rebuilds the artifact if it is stale.
    ///
    /// A stale artifact is deleted before the fetch, so a failed refresh
    /// leaves no cache behind. Every reader goes through this before `load`.
    ///
    /// # Arguments
    /// * `fetcher` - Downloads the tide page when a rebuild is needed
    /// * `extractor` - Turns the page into the current month
    /// * `max_age_minutes` - Oldest artifact that still counts as fresh
    ///
    /// # Returns
    /// * `Ok(true)` if the artifact was rebuilt
    /// * `Ok(false)` if it was fresh already
    /// * `Err` if the rebuild failed
    pub async fn ensure_fresh(
        &self,
        fetcher: &mut PageFetcher,
        extractor: &TableExtractor,
        max_age_minutes: u64,
    ) -> Result<bool, RefreshError> {
        if !self.is_stale(max_age_minutes) {
            debug!(path = %self.path.display(), "Cache file is fresh");
            return Ok(false);
        }
        match self.modified_at() {
            Some(modified) => info!(%modified, "Cache file outdated, reloading"),
            None => info!("No cache file, loading from server"),
        }
        self.invalidate()?;
        self.refresh(fetcher, extractor).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::TempDir;

    fn create_test_cache() -> (TideCache, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let cache = TideCache::with_path(temp_dir.path().join(CACHE_FILE_NAME), Tz::UTC);
        (cache, temp_dir)
    }

    fn sample_month() -> MonthCache {
        let mut month = MonthCache::new();
        for day in 1..=3u32 {
            month.insert(
                format!("{:02}0924", day),
                vec![
                    day.to_string(),
                    "03:17".into(),
                    "54".into(),
                    "18:03".into(),
                    "49".into(),
                    "10:02".into(),
                    "26".into(),
                    "-".into(),
                    "-".into(),
                ],
            );
        }
        month
    }

    fn set_age(cache: &TideCache, age: Duration, now: SystemTime) {
        let file = File::options().write(true).open(cache.path()).unwrap();
        file.set_modified(now - age).unwrap();
    }

    #[test]
    fn test_missing_artifact_is_stale() {
        let (cache, _temp_dir) = create_test_cache();
        assert!(cache.is_stale(DEFAULT_MAX_AGE_MINUTES));
        assert!(cache.modified_at().is_none());
    }

    #[test]
    fn test_staleness_boundary() {
        let (cache, _temp_dir) = create_test_cache();
        cache.save(&sample_month()).unwrap();
        let now = SystemTime::now();

        set_age(&cache, Duration::from_secs(59 * 60), now);
        assert!(!cache.is_stale_at(60, now), "younger than max age is fresh");

        set_age(&cache, Duration::from_secs(60 * 60), now);
        assert!(!cache.is_stale_at(60, now), "exactly max age is still fresh");

        set_age(&cache, Duration::from_secs(60 * 60 + 1), now);
        assert!(cache.is_stale_at(60, now), "older than max age is stale");
    }

    #[test]
    fn test_freshly_saved_artifact_is_not_stale() {
        let (cache, _temp_dir) = create_test_cache();
        cache.save(&sample_month()).unwrap();
        assert!(!cache.is_stale(DEFAULT_MAX_AGE_MINUTES));
        assert!(cache.modified_at().is_some());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let (cache, _temp_dir) = create_test_cache();
        let month = sample_month();

        cache.save(&month).unwrap();

        assert_eq!(cache.load(), Some(month));
    }

    #[test]
    fn test_artifact_is_a_plain_key_to_array_object() {
        let (cache, _temp_dir) = create_test_cache();
        cache.save(&sample_month()).unwrap();

        let content = fs::read_to_string(cache.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();

        let fields = value["020924"].as_array().expect("array of fields");
        assert_eq!(fields.len(), 9);
        assert_eq!(fields[0], "2");
        let entries = fs::read_dir(cache.path().parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1, "temporary file is renamed away");
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("dir").join(CACHE_FILE_NAME);
        let cache = TideCache::with_path(path.clone(), Tz::UTC);

        cache.save(&sample_month()).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_load_returns_none_for_missing_or_malformed_file() {
        let (cache, _temp_dir) = create_test_cache();
        assert!(cache.load().is_none());

        fs::write(cache.path(), "{ not json").unwrap();
        assert!(cache.load().is_none());

        fs::write(cache.path(), r#"["a", "b"]"#).unwrap();
        assert!(cache.load().is_none());
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        let (cache, _temp_dir) = create_test_cache();
        cache.save(&sample_month()).unwrap();

        cache.invalidate().unwrap();
        assert!(!cache.path().exists());
        cache.invalidate().expect("second invalidate is a no-op");
    }

    #[test]
    fn test_concurrent_saves_never_fail_or_expose_partial_files() {
        let (cache, _temp_dir) = create_test_cache();
        let month = sample_month();
        cache.save(&month).unwrap();

        std::thread::scope(|scope| {
            let writers: Vec<_> = (0..2)
                .map(|_| {
                    scope.spawn(|| {
                        (0..200)
                            .filter(|_| cache.save(&month).is_err())
                            .count()
                    })
                })
                .collect();
            let reader = scope.spawn(|| {
                (0..200)
                    .filter(|_| cache.load().as_ref() != Some(&month))
                    .count()
            });

            for writer in writers {
                assert_eq!(writer.join().unwrap(), 0, "no save may fail");
            }
            assert_eq!(reader.join().unwrap(), 0, "readers only see complete files");
        });

        let entries = fs::read_dir(cache.path().parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1, "no temporary files are left behind");
    }

    #[test]
    fn test_huge_max_age_does_not_overflow() {
        let (cache, _temp_dir) = create_test_cache();
        cache.save(&sample_month()).unwrap();
        assert!(!cache.is_stale(u64::MAX));
    }

    #[test]
    fn test_overwrite_existing_artifact() {
        let (cache, _temp_dir) = create_test_cache();
        let mut month = sample_month();
        cache.save(&month).unwrap();

        month.remove("030924");
        cache.save(&month).unwrap();

        assert_eq!(cache.load().unwrap().len(), 2);
    }
}
