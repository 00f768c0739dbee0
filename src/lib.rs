pub mod http;
pub mod processor;
pub mod runtime;
pub mod services;
pub mod sources;

pub use http::{
    HttpClientOptions, HttpError, HttpMetricsSnapshot, JsonHttpClient, JsonResponse, RetryPolicy,
    StatusClass, ETHERSCAN_RETRY, SOURCIFY_RETRY,
};
pub use processor::orchestrator::{Orchestrator, Schedule};
pub use processor::reconcile::{
    dry_run_lines, load_missing, plan_etherscan, select_missing, EtherscanPlan,
};
pub use runtime::config::{FetchConfig, FetchConfigBuilder, FetchConfigParams};
pub use runtime::hooks::{FetchObserver, NoopObserver};
pub use runtime::telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
pub use services::{ContractSourceService, EtherscanService, FetchFuture, SourcifyService};
pub use sources::{
    load_address_labels, AddressError, AddressLabel, ContractAddress, CountingRule, FetchResult,
    RunIndex, ServiceStatus, SourceFile,
};
