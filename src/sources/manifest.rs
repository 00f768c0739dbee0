//! Per-contract manifests and the run-level index that aggregates them.

use crate::sources::address::AddressLabel;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Outcome of one fetch cycle for one contract. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchResult {
    pub chain_id: u64,
    pub address: String,
    pub label: Option<String>,
    pub endpoint: String,
    pub retrieved_at: String,
    /// `0` when no HTTP response was received at all.
    pub http_status: u16,
    #[serde(flatten)]
    pub status: ServiceStatus,
    pub files_saved: usize,
    pub error: Option<String>,
}

/// Service-specific status fields, inlined into the manifest.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServiceStatus {
    Sourcify {
        status: Option<String>,
    },
    Etherscan {
        #[serde(rename = "apiStatus")]
        api_status: Option<String>,
        #[serde(rename = "apiMessage")]
        api_message: Option<String>,
    },
}

impl ServiceStatus {
    pub fn sourcify() -> Self {
        ServiceStatus::Sourcify { status: None }
    }

    pub fn etherscan() -> Self {
        ServiceStatus::Etherscan {
            api_status: None,
            api_message: None,
        }
    }
}

impl FetchResult {
    pub fn new(
        chain_id: u64,
        entry: &AddressLabel,
        endpoint: impl Into<String>,
        status: ServiceStatus,
    ) -> Self {
        Self {
            chain_id,
            address: entry.address.lowercase().to_owned(),
            label: entry.label.clone(),
            endpoint: endpoint.into(),
            retrieved_at: utc_timestamp(),
            http_status: 0,
            status,
            files_saved: 0,
            error: None,
        }
    }
}

/// How a service maps results onto the index counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountingRule {
    /// 200 is downloaded, 404 is missing, anything else is an error.
    HttpStatus,
    /// Any saved file is downloaded, zero files is an error.
    FilesSaved,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexCounts {
    pub downloaded: usize,
    pub missing: usize,
    pub errors: usize,
}

impl CountingRule {
    pub fn classify(self, result: &FetchResult) -> IndexCounts {
        let mut counts = IndexCounts::default();
        match self {
            CountingRule::HttpStatus => match result.http_status {
                200 => counts.downloaded = 1,
                404 => counts.missing = 1,
                _ => counts.errors = 1,
            },
            CountingRule::FilesSaved => {
                if result.files_saved > 0 {
                    counts.downloaded = 1;
                } else {
                    counts.errors = 1;
                }
            }
        }
        counts
    }

    pub fn tally(self, results: &[FetchResult]) -> IndexCounts {
        results.iter().fold(IndexCounts::default(), |acc, result| {
            let one = self.classify(result);
            IndexCounts {
                downloaded: acc.downloaded + one.downloaded,
                missing: acc.missing + one.missing,
                errors: acc.errors + one.errors,
            }
        })
    }
}

/// Snapshot of one orchestrator run, rewritten in full every time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunIndex {
    pub generated_at: String,
    pub chain_id: u64,
    pub total: usize,
    pub downloaded: usize,
    pub missing: usize,
    pub errors: usize,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
    pub results: Vec<FetchResult>,
}

impl RunIndex {
    pub fn new(chain_id: u64, mut results: Vec<FetchResult>, counting: CountingRule) -> Self {
        sort_results(&mut results);
        let counts = counting.tally(&results);
        Self {
            generated_at: utc_timestamp(),
            chain_id,
            total: results.len(),
            downloaded: counts.downloaded,
            missing: counts.missing,
            errors: counts.errors,
            extra: BTreeMap::new(),
            results,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Orders results by `(chain_id, address)` so the index never depends on
/// completion order.
pub fn sort_results(results: &mut [FetchResult]) {
    results.sort_by(|a, b| (a.chain_id, &a.address).cmp(&(b.chain_id, &b.address)));
}

/// UTC RFC 3339 timestamp with second precision, e.g. `2025-01-01T00:00:00+00:00`.
pub fn utc_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}
