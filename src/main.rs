//! tidewatch - tides for Mauritius from the command line
//!
//! Prints the tide table of a day, or runs a small HTTP API that keeps the
//! cached month warm in the background.

use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tidewatch::cache::TideCache;
use tidewatch::cli::{log_filter, Cli, RunConfig};
use tidewatch::data::query::DATE_KEY_FORMAT;
use tidewatch::data::{EventStatus, PageFetcher, TideQueryService};
use tidewatch::display::{render_day, render_fields, render_next_tide};
use tidewatch::refresh::{RefreshConfig, RefreshScheduler};
use tidewatch::server::{self, ApiState};

/// Initialize the tracing subscriber for logging
///
/// `RUST_LOG` wins over the `-d` count. With `-f`, logs go to a file and the
/// returned guard must be held until exit so buffered lines are flushed.
fn init_tracing(config: &RunConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_filter(config.debug_level)));

    match &config.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            let file_name = path.file_name().unwrap_or(path.as_os_str());
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            eprintln!("Using log file: {}", path.display());
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

fn build_fetcher(config: &RunConfig) -> Result<PageFetcher> {
    Ok(PageFetcher::new(config.url.clone(), config.timeout)
        .context("Failed to build HTTP client")?
        .with_cookie_names(config.send_cookies.clone())
        .with_cookie_updates(config.update_cookies)
        .with_dump_path(config.dump_response.clone()))
}

fn build_cache(config: &RunConfig) -> Result<TideCache> {
    match &config.cache_file {
        Some(path) => Ok(TideCache::with_path(path.clone(), config.timezone)),
        None => TideCache::new(config.timezone)
            .context("Could not determine a location for the cache file"),
    }
}

/// Prints the tides of one day
///
/// In verbose mode, when every tide of today has passed, the first tide of
/// tomorrow is announced as well.
async fn run_query(config: &RunConfig, service: &TideQueryService) -> Result<()> {
    let date_key = match config.date {
        Some(date) => date.format(DATE_KEY_FORMAT).to_string(),
        None => service.today_key(),
    };

    if !config.verbose {
        let record = service.lookup(&date_key).await?;
        println!("{}", render_fields(&record)?);
        return Ok(());
    }

    let schedule = service.schedule(&date_key).await?;
    print!("{}", render_day(&date_key, &schedule));

    let today_done = date_key == service.today_key()
        && schedule.iter().all(|(_, status)| *status == EventStatus::Elapsed);
    if today_done {
        match service.next_tide().await? {
            Some((date, event)) => println!("{}", render_next_tide(date, &event)),
            None => info!("Next tide is outside the cached month"),
        }
    }
    Ok(())
}

/// Serves the HTTP API with a background refresh task
async fn run_server(config: &RunConfig, service: TideQueryService) -> Result<()> {
    info!(
        update_delay_secs = config.update_delay.as_secs(),
        "Running in server mode"
    );

    // The API must not start on an empty cache
    service
        .ensure_fresh()
        .await
        .context("Failed to create local data cache. Aborting server")?;

    let scheduler = RefreshScheduler::new(
        service.cache().clone(),
        build_fetcher(config)?,
        RefreshConfig {
            update_delay: config.update_delay,
        },
    );
    let refresh = scheduler.spawn();

    let state = ApiState::new(Arc::new(service), config.api_token.clone());
    let result = server::serve(state, config.listen).await;

    refresh.shutdown().await;
    result.context("API server failed")
}

async fn run(config: RunConfig) -> Result<()> {
    info!(timezone = %config.timezone, server = config.server, use_cache = config.use_cache, "Starting");

    let cache = build_cache(&config)?;
    info!(path = %cache.path().display(), "Cache file");
    let service = TideQueryService::new(cache, build_fetcher(&config)?, config.max_age_minutes)
        .with_cache_reuse(config.use_cache);

    if config.server {
        run_server(&config, service).await
    } else {
        run_query(&config, &service).await
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.info {
        println!("{}: version {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let config = match RunConfig::from_cli(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let _guard = init_tracing(&config);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
