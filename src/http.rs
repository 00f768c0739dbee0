//! HTTP client plumbing: options, per-service retry policies, metrics, and
//! the JSON client itself.

pub mod client;
pub mod metrics;
pub mod options;
pub mod retry;

pub use client::{HttpError, JsonHttpClient, JsonResponse};
pub use metrics::HttpMetricsSnapshot;
pub use options::HttpClientOptions;
pub use retry::{RetryPolicy, StatusClass, ETHERSCAN_RETRY, SOURCIFY_RETRY};
