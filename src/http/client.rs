//! JSON-over-HTTP client with per-service retry policies. Houses
//! `JsonHttpClient`, its error type, and the `(status, body)` response pair
//! consumed by the service adapters.

use crate::http::metrics::{HttpMetrics, HttpMetricsSnapshot};
use crate::http::options::HttpClientOptions;
use crate::http::retry::{backoff_delay, RetryContext, RetryPolicy, StatusClass};
use crate::runtime::config::FetchConfig;
use crate::sources::materialize::decode_json_text;
use anyhow::{anyhow, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::{fmt, sync::Arc};
use tokio::time::{sleep, Instant};

#[derive(Debug)]
pub enum HttpError {
    /// No HTTP response after every retry was spent.
    Transport { attempts: usize, message: String },
    /// The request could not be built (bad URL, bad header).
    Client { message: String },
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::Transport { attempts, message } => {
                write!(f, "transport failure after {attempts} attempt(s): {message}")
            }
            HttpError::Client { message } => write!(f, "invalid request: {message}"),
        }
    }
}

impl std::error::Error for HttpError {}

/// Status code plus parsed body. Non-JSON bodies are replaced by
/// `{"error": "..."}` so callers always see JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonResponse {
    pub status: u16,
    pub body: Value,
}

impl JsonResponse {
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK.as_u16()
    }
}

#[derive(Debug, Clone)]
pub struct JsonHttpClient {
    client: reqwest::Client,
    options: HttpClientOptions,
    metrics: Arc<HttpMetrics>,
}

impl JsonHttpClient {
    pub fn new() -> Result<Self> {
        Self::with_options(HttpClientOptions::default())
    }

    pub fn with_options(options: HttpClientOptions) -> Result<Self> {
        options.validate()?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(options.user_agent.clone())
            .timeout(options.request_timeout)
            .build()
            .map_err(|err| anyhow!("failed to build HTTP client: {err}"))?;

        Ok(Self {
            client,
            options,
            metrics: Arc::new(HttpMetrics::default()),
        })
    }

    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        config.validate()?;
        Self::with_options(config.http_options())
    }

    pub fn metrics(&self) -> HttpMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// GETs `url` and returns the final status and body.
    ///
    /// Statuses the policy marks transient are retried after
    /// `backoff_base * 2^attempt`; once retries run out the last response is
    /// returned as-is. Transport failures follow the same schedule and surface
    /// as [`HttpError::Transport`] when exhausted.
    pub async fn get_json(&self, url: &str, policy: &RetryPolicy) -> Result<JsonResponse> {
        let context = RetryContext::new(policy);
        let mut attempt = 0usize;

        loop {
            let start = Instant::now();

            match self.fetch_once(url).await {
                Ok(response) => match policy.classify(response.status) {
                    StatusClass::Success => {
                        self.metrics.record_success(start.elapsed());
                        context.log_success(attempt);
                        return Ok(response);
                    }
                    StatusClass::Terminal => {
                        self.metrics.record_failure(start.elapsed());
                        context.log_terminal(attempt, response.status);
                        return Ok(response);
                    }
                    StatusClass::Transient => {
                        self.metrics.record_failure(start.elapsed());
                        if attempt >= self.options.max_retries {
                            context.log_exhausted_status(attempt, response.status);
                            return Ok(response);
                        }
                        let backoff = backoff_delay(self.options.backoff_base, attempt);
                        context.log_retry_status(attempt, response.status, backoff);
                        self.metrics.record_retry();
                        sleep(backoff).await;
                    }
                },
                Err(err) if err.is_builder() => {
                    return Err(HttpError::Client {
                        message: err.to_string(),
                    }
                    .into());
                }
                Err(err) => {
                    self.metrics.record_failure(start.elapsed());
                    if attempt >= self.options.max_retries {
                        context.log_exhausted_transport(attempt, &err);
                        return Err(HttpError::Transport {
                            attempts: attempt + 1,
                            message: err.to_string(),
                        }
                        .into());
                    }
                    let backoff = backoff_delay(self.options.backoff_base, attempt);
                    context.log_retry_transport(attempt, &err, backoff);
                    self.metrics.record_retry();
                    sleep(backoff).await;
                }
            }

            attempt += 1;
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<JsonResponse, reqwest::Error> {
        // URLs may carry credentials; keep them out of error text and logs.
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(reqwest::Error::without_url)?;

        Ok(JsonResponse {
            status: status.as_u16(),
            body: parse_body(status, &bytes),
        })
    }
}

fn parse_body(status: StatusCode, bytes: &[u8]) -> Value {
    let text = decode_json_text(bytes);
    match serde_json::from_str::<Value>(&text) {
        Ok(value) => value,
        Err(err) if status == StatusCode::OK => {
            json!({ "error": format!("invalid JSON response: {err}") })
        }
        Err(_) => json!({
            "error": format!(
                "HTTP Error {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )
        }),
    }
}
