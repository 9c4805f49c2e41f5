//! Blocking HTTP retrieval with bounded retries.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::error::{ForcingError, Result};

/// Default timeout for HTTP requests in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Longest slice of an error body carried into error messages.
const MAX_BODY_CHARS: usize = 300;

/// Configuration for [`HttpFetcher`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries after the first attempt, for transient failures only.
    pub max_retries: u32,
    /// Delay before retry `n` is `n * backoff_ms`.
    pub backoff_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: 1,
            backoff_ms: 500,
        }
    }
}

impl FetchConfig {
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.backoff_ms = backoff_ms;
        self
    }
}

enum Attempt {
    Done(Option<Vec<u8>>),
    Transient(String),
    Fatal(String),
}

/// HTTP client shared by the source adapters and the grid downloader.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: FetchConfig,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Fetch `url`, failing with [`ForcingError::SourceUnavailable`] once the
    /// retries are spent or on a non-transient HTTP status.
    pub fn get(&self, url: &str, source_id: &str) -> Result<Vec<u8>> {
        match self.fetch(url, source_id, false)? {
            Some(bytes) => Ok(bytes),
            None => Err(unavailable(source_id, url, "HTTP 404 Not Found".to_string())),
        }
    }

    /// Like [`get`](Self::get), but a 404 yields `None`.
    pub fn get_optional(&self, url: &str, source_id: &str) -> Result<Option<Vec<u8>>> {
        self.fetch(url, source_id, true)
    }

    fn fetch(&self, url: &str, source_id: &str, allow_missing: bool) -> Result<Option<Vec<u8>>> {
        let mut last_reason = String::from("no attempt made");

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                std::thread::sleep(Duration::from_millis(
                    self.config.backoff_ms * attempt as u64,
                ));
            }
            debug!(source = source_id, url, attempt, "GET");

            match self.attempt(url, allow_missing) {
                Attempt::Done(body) => return Ok(body),
                Attempt::Fatal(reason) => return Err(unavailable(source_id, url, reason)),
                Attempt::Transient(reason) => {
                    warn!(source = source_id, url, attempt, %reason, "transient fetch failure");
                    last_reason = reason;
                }
            }
        }

        Err(unavailable(source_id, url, last_reason))
    }

    fn attempt(&self, url: &str, allow_missing: bool) -> Attempt {
        let response = match self.client.get(url).send() {
            Ok(response) => response,
            Err(e) => return Attempt::Transient(e.to_string()),
        };

        let status = response.status();
        if status.is_success() {
            return match response.bytes() {
                Ok(bytes) => Attempt::Done(Some(bytes.to_vec())),
                Err(e) => Attempt::Transient(e.to_string()),
            };
        }
        if status == StatusCode::NOT_FOUND && allow_missing {
            return Attempt::Done(None);
        }

        let body = response.text().unwrap_or_default();
        let reason = describe(status, &body);
        if is_transient(status) {
            Attempt::Transient(reason)
        } else {
            Attempt::Fatal(reason)
        }
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn describe(status: StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("HTTP {}", status)
    } else {
        let snippet: String = body.chars().take(MAX_BODY_CHARS).collect();
        format!("HTTP {}: {}", status, snippet)
    }
}

fn unavailable(source_id: &str, url: &str, reason: String) -> ForcingError {
    ForcingError::SourceUnavailable {
        source_id: source_id.to_string(),
        url: url.to_string(),
        reason,
    }
}
