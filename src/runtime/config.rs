use crate::http::options::{
    HttpClientOptions, DEFAULT_BACKOFF_BASE, DEFAULT_MAX_RETRIES, DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_USER_AGENT,
};
use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CHAIN_ID: u64 = 1;
pub const DEFAULT_OUTPUT_ROOT: &str = "contract_sources";
pub const DEFAULT_SOURCIFY_URL: &str = "https://sourcify.dev/server";
pub const DEFAULT_ETHERSCAN_URL: &str = "https://api.etherscan.io/v2/api";
const MAX_DEFAULT_WORKERS: usize = 12;
const FALLBACK_PARALLELISM: usize = 4;
const DEFAULT_THROTTLE_MS: u64 = 200;
const DEFAULT_PROGRESS_INTERVAL_SECS: u64 = 5;

/// `min(12, available parallelism)`.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_PARALLELISM)
        .min(MAX_DEFAULT_WORKERS)
}

/// Runtime configuration shared by both download stages.
///
/// All instances must be constructed via [`FetchConfig::builder`] or [`FetchConfig::new`]
/// so invariants are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    chain_id: u64,
    output_root: PathBuf,
    worker_count: usize,
    request_timeout: Duration,
    max_retries: usize,
    backoff_base: Duration,
    throttle: Duration,
    progress_interval: Duration,
    sourcify_url: String,
    etherscan_url: String,
    user_agent: String,
}

pub struct FetchConfigParams {
    pub chain_id: u64,
    pub output_root: PathBuf,
    pub worker_count: usize,
    pub request_timeout: Duration,
    pub max_retries: usize,
    pub backoff_base: Duration,
    pub throttle: Duration,
    pub progress_interval: Duration,
    pub sourcify_url: String,
    pub etherscan_url: String,
    pub user_agent: String,
}

impl FetchConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> FetchConfigBuilder {
        FetchConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: FetchConfigParams) -> Result<Self> {
        let FetchConfigParams {
            chain_id,
            output_root,
            worker_count,
            request_timeout,
            max_retries,
            backoff_base,
            throttle,
            progress_interval,
            sourcify_url,
            etherscan_url,
            user_agent,
        } = params;

        let config = Self {
            chain_id,
            output_root,
            worker_count,
            request_timeout,
            max_retries,
            backoff_base,
            throttle,
            progress_interval,
            sourcify_url: trimmed_string(sourcify_url),
            etherscan_url: trimmed_string(etherscan_url),
            user_agent: trimmed_string(user_agent),
        };

        config.validate()?;
        Ok(config)
    }

    /// Numeric chain identifier sent to both services.
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Root of the `{chain}/{address}/` output tree.
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Concurrent Sourcify workers.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    /// Delay before every sequential Etherscan request.
    pub fn throttle(&self) -> Duration {
        self.throttle
    }

    /// Interval between progress log lines during a run.
    pub fn progress_interval(&self) -> Duration {
        self.progress_interval
    }

    pub fn sourcify_url(&self) -> &str {
        &self.sourcify_url
    }

    pub fn etherscan_url(&self) -> &str {
        &self.etherscan_url
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn http_options(&self) -> HttpClientOptions {
        HttpClientOptions {
            request_timeout: self.request_timeout,
            max_retries: self.max_retries,
            backoff_base: self.backoff_base,
            user_agent: self.user_agent.clone(),
        }
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        if self.chain_id == 0 {
            bail!("chain_id must be greater than 0");
        }

        if self.output_root.as_os_str().is_empty() {
            bail!("output_root cannot be empty");
        }

        if self.worker_count == 0 {
            bail!("worker_count must be greater than 0");
        }

        if self.request_timeout.is_zero() {
            bail!("request_timeout must be greater than 0");
        }

        if self.progress_interval.is_zero() {
            bail!("progress_interval must be greater than 0");
        }

        validate_url(&self.sourcify_url, "sourcify_url")?;
        validate_url(&self.etherscan_url, "etherscan_url")?;
        ensure_not_empty(&self.user_agent, "user_agent")?;

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct FetchConfigBuilder {
    chain_id: Option<u64>,
    output_root: Option<PathBuf>,
    worker_count: Option<usize>,
    request_timeout: Option<Duration>,
    max_retries: Option<usize>,
    backoff_base: Option<Duration>,
    throttle: Option<Duration>,
    progress_interval: Option<Duration>,
    sourcify_url: Option<String>,
    etherscan_url: Option<String>,
    user_agent: Option<String>,
}

impl FetchConfigBuilder {
    pub fn chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.output_root = Some(root.into());
        self
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn backoff_base(mut self, backoff: Duration) -> Self {
        self.backoff_base = Some(backoff);
        self
    }

    pub fn throttle(mut self, throttle: Duration) -> Self {
        self.throttle = Some(throttle);
        self
    }

    pub fn progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = Some(interval);
        self
    }

    pub fn sourcify_url(mut self, url: impl Into<String>) -> Self {
        self.sourcify_url = Some(url.into());
        self
    }

    pub fn etherscan_url(mut self, url: impl Into<String>) -> Self {
        self.etherscan_url = Some(url.into());
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> Result<FetchConfig> {
        let params = FetchConfigParams {
            chain_id: self.chain_id.unwrap_or(DEFAULT_CHAIN_ID),
            output_root: self
                .output_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_ROOT)),
            worker_count: self.worker_count.unwrap_or_else(default_worker_count),
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            backoff_base: self.backoff_base.unwrap_or(DEFAULT_BACKOFF_BASE),
            throttle: self
                .throttle
                .unwrap_or_else(|| Duration::from_millis(DEFAULT_THROTTLE_MS)),
            progress_interval: self
                .progress_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_PROGRESS_INTERVAL_SECS)),
            sourcify_url: self
                .sourcify_url
                .unwrap_or_else(|| DEFAULT_SOURCIFY_URL.to_owned()),
            etherscan_url: self
                .etherscan_url
                .unwrap_or_else(|| DEFAULT_ETHERSCAN_URL.to_owned()),
            user_agent: self
                .user_agent
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_owned()),
        };

        FetchConfig::new(params)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_not_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{field} cannot be empty");
    }
    Ok(())
}

fn validate_url(url: &str, field: &str) -> Result<()> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        bail!("{field} must start with http:// or https://");
    }
    Ok(())
}
