//! Upstream source registries. Each adapter owns its request format, response
//! validation, snapshot policy, and manifest naming; the orchestrator only
//! sees [`ContractSourceService`].

pub mod etherscan;
pub mod sourcify;

pub use etherscan::EtherscanService;
pub use sourcify::SourcifyService;

use crate::http::{JsonHttpClient, JsonResponse, RetryPolicy};
use crate::sources::address::AddressLabel;
use crate::sources::manifest::{CountingRule, FetchResult};
use crate::sources::materialize::{write_source, SourceFile};
use anyhow::Result;
use core::future::Future;
use core::pin::Pin;
use serde_json::json;
use std::path::Path;

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<FetchResult>> + Send + 'a>>;

/// One fetch-and-materialize cycle per contract against a single upstream.
///
/// `fetch_contract` resolves to `Ok` for every per-contract outcome, including
/// HTTP errors, shape mismatches, exhausted transport retries and source files
/// that could not be written; the manifest has already been written when it
/// returns. `Err` is reserved for failing to write the contract directory,
/// a snapshot or the manifest, which stops the whole run.
pub trait ContractSourceService: Send + Sync + 'static {
    /// Short service name used in logs.
    fn name(&self) -> &'static str;

    fn chain_id(&self) -> u64;

    fn output_root(&self) -> &Path;

    /// File name of the run index written at the output root.
    fn index_file(&self) -> &'static str;

    fn counting(&self) -> CountingRule;

    fn fetch_contract<'a>(&'a self, entry: &'a AddressLabel) -> FetchFuture<'a>;
}

/// Runs the request and folds an exhausted transport failure into a
/// status-0 response whose body carries the error text.
pub(crate) async fn request_json(
    client: &JsonHttpClient,
    url: &str,
    policy: &RetryPolicy,
) -> JsonResponse {
    match client.get_json(url, policy).await {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(service = policy.service, error = %err, "no HTTP response received");
            JsonResponse {
                status: 0,
                body: json!({ "error": err.to_string() }),
            }
        }
    }
}

/// Files written by [`save_sources`] and the first write failure, if any.
#[derive(Debug, Default)]
pub(crate) struct SavedSources {
    pub files_saved: usize,
    pub error: Option<String>,
}

/// Writes every file under `dir`. A file that cannot be written, for example
/// because an earlier entry claimed its parent as a file, is skipped.
pub(crate) async fn save_sources<'a>(
    service: &'static str,
    dir: &Path,
    files: impl IntoIterator<Item = &'a SourceFile>,
) -> SavedSources {
    let mut saved = SavedSources::default();
    for file in files {
        match write_source(dir, file).await {
            Ok(_) => saved.files_saved += 1,
            Err(err) => {
                let message = format!("{err:#}");
                tracing::warn!(
                    service,
                    path = %file.relative_path.display(),
                    error = %message,
                    "skipping source file"
                );
                saved.error.get_or_insert(message);
            }
        }
    }
    saved
}

pub(crate) fn log_outcome(service: &'static str, counting: CountingRule, result: &FetchResult) {
    if counting.classify(result).missing > 0 {
        tracing::info!(
            service,
            chain_id = result.chain_id,
            address = %result.address,
            "contract not found upstream"
        );
        return;
    }

    match &result.error {
        None => tracing::info!(
            service,
            chain_id = result.chain_id,
            address = %result.address,
            http_status = result.http_status,
            files_saved = result.files_saved,
            "contract sources saved"
        ),
        Some(error) => tracing::warn!(
            service,
            chain_id = result.chain_id,
            address = %result.address,
            http_status = result.http_status,
            error = %error,
            "contract fetch failed"
        ),
    }
}
