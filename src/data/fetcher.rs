//! Upstream page fetcher
//!
//! Issues the single GET that downloads the tide table page, keeping a small
//! cookie jar between calls made by the same fetcher.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{self, HeaderMap};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Tide tables page of the Mauritius Meteorological Services
pub const DEFAULT_URL: &str = "http://metservice.intnet.mu/sun-moon-and-tides-tides-mauritius.php";

/// Request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

const USER_AGENT: &str = concat!("tidewatch/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur while downloading the page
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, timeout or body read failure
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server answered with something other than 200 OK
    #[error("Unexpected HTTP status: {status}")]
    UnexpectedStatus { status: StatusCode },
}

/// Raw markup returned by the upstream server
#[derive(Debug, Clone)]
pub struct RawPage {
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

/// Latest value of every cookie the server has handed out
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCookieJar {
    cookies: BTreeMap<String, String>,
}

impl RequestCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Builds a `Cookie` header value from the named cookies.
    ///
    /// Names the jar does not know are skipped with a warning.
    pub fn header_for(&self, names: &[String]) -> String {
        names
            .iter()
            .filter_map(|name| match self.cookies.get(name) {
                Some(value) => Some(format!("{}={}", name, value)),
                None => {
                    warn!(cookie = %name, "Cookie not found");
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Records cookies from `Set-Cookie` response headers.
    ///
    /// Cookies with an empty or `undefined` value are dropped. Returns the
    /// number of cookies added or changed.
    pub fn update_from(&mut self, headers: &HeaderMap) -> usize {
        let mut changed = 0;
        for raw in headers.get_all(header::SET_COOKIE) {
            let Ok(raw) = raw.to_str() else {
                continue;
            };
            let pair = raw.split(';').next().unwrap_or_default();
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let (name, value) = (name.trim(), value.trim());
            if name.is_empty() {
                continue;
            }
            if value.is_empty() || value == "undefined" {
                debug!(cookie = %name, "Skipping cookie with undefined value");
                continue;
            }
            if self.store(name, value) {
                changed += 1;
            }
        }
        changed
    }

    fn store(&mut self, name: &str, value: &str) -> bool {
        match self.cookies.get(name) {
            Some(current) if current == value => {
                debug!(cookie = %name, "Cookie not modified");
                false
            }
            Some(_) => {
                info!(cookie = %name, "Updating cookie");
                self.cookies.insert(name.to_string(), value.to_string());
                true
            }
            None => {
                info!(cookie = %name, "Adding cookie");
                self.cookies.insert(name.to_string(), value.to_string());
                true
            }
        }
    }
}

/// Downloads the tide table page.
///
/// A fetcher is owned by one unit of work (a CLI query or the refresh task)
/// so its cookie jar is never shared.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    client: Client,
    url: String,
    cookies: RequestCookieJar,
    send_cookies: Vec<String>,
    update_cookies: bool,
    dump_path: Option<PathBuf>,
}

impl PageFetcher {
    /// Creates a fetcher for `url` with the given request timeout
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self::with_client(client, url))
    }

    /// Creates a fetcher sharing an existing HTTP client
    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            cookies: RequestCookieJar::new(),
            send_cookies: Vec::new(),
            update_cookies: false,
            dump_path: None,
        }
    }

    /// Cookies from the jar to send with each request
    pub fn with_cookie_names(mut self, names: Vec<String>) -> Self {
        self.send_cookies = names;
        self
    }

    /// Whether `Set-Cookie` headers update the jar
    pub fn with_cookie_updates(mut self, enabled: bool) -> Self {
        self.update_cookies = enabled;
        self
    }

    /// Saves every successful response body to `path`
    pub fn with_dump_path(mut self, path: Option<PathBuf>) -> Self {
        self.dump_path = path;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn cookies(&self) -> &RequestCookieJar {
        &self.cookies
    }

    /// Downloads the page once. No retries.
    pub async fn fetch(&mut self) -> Result<RawPage, FetchError> {
        info!(url = %self.url, "Fetching tide table page");

        let mut request = self
            .client
            .get(&self.url)
            .header(header::ACCEPT, "text/html,application/xhtml+xml");
        if !self.send_cookies.is_empty() {
            let cookie = self.cookies.header_for(&self.send_cookies);
            if !cookie.is_empty() {
                request = request.header(header::COOKIE, cookie);
            }
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(%status, "Response received");
        if status != StatusCode::OK {
            warn!(%status, "Invalid status code (expected 200)");
            return Err(FetchError::UnexpectedStatus { status });
        }

        if self.update_cookies {
            self.cookies.update_from(response.headers());
        }

        let body = response.text().await?;
        if let Some(path) = &self.dump_path {
            dump_body(path, &body).await;
        }

        Ok(RawPage {
            body,
            fetched_at: Utc::now(),
        })
    }
}

async fn dump_body(path: &Path, body: &str) {
    match tokio::fs::write(path, body).await {
        Ok(()) => debug!(path = %path.display(), "Saved raw response"),
        Err(e) => debug!(path = %path.display(), error = %e, "Could not save raw response"),
    }
}
