//! Cache module for the scraped tide month
//!
//! This module provides the tide cache that persists one month of tide tables
//! to a single JSON file. Staleness is judged from the file's modification
//! time, and a stale file is rebuilt from the upstream page before it is read.

mod manager;

pub use manager::{RefreshError, TideCache, CACHE_FILE_NAME, DEFAULT_MAX_AGE_MINUTES};
