//! Configurable knobs for the HTTP client along with validation helpers so
//! callers can reason about timeouts and retry/backoff limits.

use anyhow::{bail, Result};
use std::time::Duration;

pub const DEFAULT_USER_AGENT: &str = concat!("contract-sources/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(1_000);

#[derive(Debug, Clone)]
pub struct HttpClientOptions {
    pub request_timeout: Duration,
    /// Retries on top of the first attempt.
    pub max_retries: usize,
    /// Sleep before retry `n` (0-indexed) is `backoff_base * 2^n`. Zero retries
    /// immediately.
    pub backoff_base: Duration,
    pub user_agent: String,
}

impl Default for HttpClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl HttpClientOptions {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }
        if self.user_agent.trim().is_empty() {
            bail!("user_agent cannot be empty");
        }
        Ok(())
    }
}
