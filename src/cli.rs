//! Command-line interface parsing for tidewatch
//!
//! This module handles parsing of CLI arguments using clap and turns them into
//! a validated `RunConfig` that is handed to every component at startup.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use chrono_tz::Tz;
use clap::{ArgAction, Parser};
use thiserror::Error;

use crate::cache::DEFAULT_MAX_AGE_MINUTES;
use crate::data::fetcher::{DEFAULT_TIMEOUT_SECS, DEFAULT_URL};
use crate::data::query::parse_date;
use crate::refresh::MAX_UPDATE_DELAY;

/// Log file name used when `--file` is given without a value
pub const DEFAULT_LOG_FILE: &str = "tidewatch-debug.log";

/// Timezone of the tide station
pub const DEFAULT_TIMEZONE: &str = "Indian/Mauritius";

/// Port of the HTTP API in server mode
pub const DEFAULT_PORT: u16 = 5002;

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// The date argument is not a valid `DDMMYY` date
    #[error("Invalid tides date argument: '{0}' (expected DDMMYY)")]
    InvalidDate(String),

    /// The timezone is not a known IANA name
    #[error("Invalid timezone: '{0}'")]
    InvalidTimezone(String),

    /// A zero refresh interval would spin
    #[error("Update delay must be at least one second")]
    ZeroDelay,

    /// The refresh interval is longer than the scheduler accepts
    #[error("Update delay must be at most {max} seconds")]
    DelayTooLong { max: u64 },
}

/// Get tides information from the metservice.intnet.mu server
#[derive(Parser, Debug)]
#[command(name = "tidewatch")]
#[command(about = "Get tides information from the metservice.intnet.mu server")]
#[command(version)]
pub struct Cli {
    /// Run in server mode (as a web service)
    #[arg(short = 's', long)]
    pub server: bool,

    /// Print debug messages (repeat for more detail)
    #[arg(short = 'd', long = "debug", action = ArgAction::Count)]
    pub debug: u8,

    /// Provide more information
    #[arg(short, long)]
    pub verbose: bool,

    /// Write debug messages to LOGFILE
    #[arg(
        short = 'f',
        long = "file",
        value_name = "LOGFILE",
        num_args = 0..=1,
        default_missing_value = ""
    )]
    pub log_file: Option<String>,

    /// Use the local cache if available (default)
    #[arg(short = 'C', long = "cache", overrides_with = "no_cache")]
    pub cache: bool,

    /// Reload the tide page on every query
    #[arg(long = "no-cache", overrides_with = "cache")]
    pub no_cache: bool,

    /// Update interval in seconds (server mode only)
    #[arg(short = 'D', long = "delay", value_name = "DELAY", default_value_t = 86_400)]
    pub update_delay: u64,

    /// Print version and exit
    #[arg(short = 'I', long = "info")]
    pub info: bool,

    /// Tide table page to scrape
    #[arg(long, env = "TIDES_URL", default_value = DEFAULT_URL)]
    pub url: String,

    /// Cache file location (defaults to next to the executable)
    #[arg(long, env = "TIDES_CACHE_FILE", value_name = "PATH")]
    pub cache_file: Option<PathBuf>,

    /// Maximum cache age in minutes before it is reloaded
    #[arg(long, value_name = "MINUTES", default_value_t = DEFAULT_MAX_AGE_MINUTES)]
    pub max_age: u64,

    /// Timezone used for "today" and "next tide"
    #[arg(long, env = "TIDES_TIMEZONE", default_value = DEFAULT_TIMEZONE)]
    pub timezone: String,

    /// Address the API server listens on
    #[arg(long, default_value = "127.0.0.1")]
    pub bind: IpAddr,

    /// Port the API server listens on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Bearer token required by the API server
    #[arg(long, env = "TIDES_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Save the raw tide page to PATH on every fetch
    #[arg(long, value_name = "PATH")]
    pub dump_response: Option<PathBuf>,

    /// Record cookies set by the server
    #[arg(long)]
    pub update_cookies: bool,

    /// Cookie to send back to the server (repeatable)
    #[arg(long = "send-cookie", value_name = "NAME")]
    pub send_cookies: Vec<String>,

    /// HTTP request timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Tides date to show (DDMMYY), today if omitted
    #[arg(value_name = "DATE")]
    pub date: Option<String>,
}

/// Validated configuration passed to every component at startup
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub server: bool,
    pub verbose: bool,
    pub debug_level: u8,
    pub log_file: Option<PathBuf>,
    pub use_cache: bool,
    pub update_delay: Duration,
    pub max_age_minutes: u64,
    pub url: String,
    pub cache_file: Option<PathBuf>,
    pub timezone: Tz,
    pub listen: SocketAddr,
    pub api_token: Option<String>,
    pub dump_response: Option<PathBuf>,
    pub update_cookies: bool,
    pub send_cookies: Vec<String>,
    pub timeout: Duration,
    /// Requested date; `None` means today in `timezone`
    pub date: Option<NaiveDate>,
}

/// Parses a `DDMMYY` date argument.
pub fn parse_date_arg(s: &str) -> Result<NaiveDate, CliError> {
    parse_date(s.trim()).map_err(|_| CliError::InvalidDate(s.to_string()))
}

/// Parses an IANA timezone name such as `Indian/Mauritius`.
pub fn parse_timezone(s: &str) -> Result<Tz, CliError> {
    s.parse::<Tz>()
        .map_err(|_| CliError::InvalidTimezone(s.to_string()))
}

/// Default `tracing` filter for a `-d` count
pub fn log_filter(debug_level: u8) -> &'static str {
    match debug_level {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

impl RunConfig {
    /// Creates a RunConfig from parsed CLI arguments.
    ///
    /// The date argument is checked here, before any network or file access.
    pub fn from_cli(cli: &Cli) -> Result<Self, CliError> {
        let date = cli.date.as_deref().map(parse_date_arg).transpose()?;
        let timezone = parse_timezone(&cli.timezone)?;
        let update_delay = Duration::from_secs(cli.update_delay);
        if update_delay.is_zero() {
            return Err(CliError::ZeroDelay);
        }
        if update_delay > MAX_UPDATE_DELAY {
            return Err(CliError::DelayTooLong {
                max: MAX_UPDATE_DELAY.as_secs(),
            });
        }

        let log_file = cli.log_file.as_ref().map(|f| {
            if f.is_empty() {
                PathBuf::from(DEFAULT_LOG_FILE)
            } else {
                PathBuf::from(f)
            }
        });

        Ok(RunConfig {
            server: cli.server,
            verbose: cli.verbose,
            debug_level: cli.debug,
            log_file,
            use_cache: !cli.no_cache,
            update_delay,
            max_age_minutes: cli.max_age,
            url: cli.url.clone(),
            cache_file: cli.cache_file.clone(),
            timezone,
            listen: SocketAddr::new(cli.bind, cli.port),
            api_token: cli.api_token.clone().filter(|t| !t.is_empty()),
            dump_response: cli.dump_response.clone(),
            update_cookies: cli.update_cookies,
            send_cookies: cli.send_cookies.clone(),
            timeout: Duration::from_secs(cli.timeout),
            date,
        })
    }
}
