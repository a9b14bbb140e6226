//! Background cache refresh
//!
//! In server mode a `RefreshScheduler` task reloads the tide page on a fixed
//! interval, independently of request handling. It owns its own fetcher and
//! cache handle; the cache file is the only thing it shares with the query
//! path. A failed cycle is logged and retried at the next tick.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::cache::{RefreshError, TideCache};
use crate::data::{PageFetcher, TableExtractor};

/// Default interval between refreshes (one day)
pub const DEFAULT_UPDATE_DELAY: Duration = Duration::from_secs(86_400);

/// Longest accepted interval (one year)
pub const MAX_UPDATE_DELAY: Duration = Duration::from_secs(365 * 86_400);

/// Shortest accepted interval; tokio rejects a zero period
const MIN_UPDATE_DELAY: Duration = Duration::from_millis(10);

/// Configuration for the refresh loop
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Interval between refreshes, clamped to `MAX_UPDATE_DELAY`
    pub update_delay: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            update_delay: DEFAULT_UPDATE_DELAY,
        }
    }
}

/// Periodically rebuilds the tide cache.
///
/// The interval is the staleness policy here: every tick refreshes
/// unconditionally.
#[derive(Debug)]
pub struct RefreshScheduler {
    cache: TideCache,
    fetcher: PageFetcher,
    extractor: TableExtractor,
    config: RefreshConfig,
}

/// Handle for stopping the background refresh task
pub struct RefreshHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl RefreshScheduler {
    pub fn new(cache: TideCache, fetcher: PageFetcher, config: RefreshConfig) -> Self {
        Self {
            cache,
            fetcher,
            extractor: TableExtractor::new(),
            config,
        }
    }

    /// Runs one refresh cycle.
    ///
    /// # Returns
    /// * `Ok(days)` - number of days written to the cache
    /// * `Err` - the fetch, parse or save failed; the old artifact is kept
    pub async fn tick(&mut self) -> Result<usize, RefreshError> {
        info!(path = %self.cache.path().display(), "Reloading cache file from server");
        let days = self.cache.refresh(&mut self.fetcher, &self.extractor).await?;
        info!(days, "Data collected from server");
        Ok(days)
    }

    /// Interval actually used by the loop
    pub fn period(&self) -> Duration {
        self.config
            .update_delay
            .clamp(MIN_UPDATE_DELAY, MAX_UPDATE_DELAY)
    }

    /// Spawns the refresh loop on the tokio runtime.
    ///
    /// The first refresh happens one interval after spawning; the caller is
    /// expected to have made the cache fresh already. Failed cycles never
    /// stop the loop.
    ///
    /// # Returns
    /// A `RefreshHandle` whose `shutdown` stops the loop and waits for it
    pub fn spawn(mut self) -> RefreshHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let period = self.period();
        info!(
            every_secs = period.as_secs(),
            path = %self.cache.path().display(),
            "Refresh task started"
        );

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the first tick (immediate)
            interval.tick().await;

            let mut failures: u32 = 0;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match self.tick().await {
                            Ok(_) => failures = 0,
                            Err(e) => {
                                failures += 1;
                                error!(error = %e, failures, "Failed to create/update local data cache");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        if failures > 0 {
                            warn!(failures, "Refresh task stopped after failed cycles");
                        }
                        info!("Refresh task stopped");
                        break;
                    }
                }
            }
        });

        RefreshHandle { shutdown_tx, task }
    }
}

impl RefreshHandle {
    /// Stops the refresh loop and waits for it to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            error!(error = %e, "Refresh task ended abnormally");
        }
    }
}
