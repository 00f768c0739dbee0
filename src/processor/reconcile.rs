//! Turns a Sourcify run index into the Etherscan input batch.

use crate::http::JsonHttpClient;
use crate::runtime::config::FetchConfig;
use crate::services::etherscan::{require_api_key, EtherscanService};
use crate::sources::address::{AddressLabel, ContractAddress};
use anyhow::{bail, Context, Result};
use serde_json::Value;
use std::path::Path;

const NOT_FOUND: u64 = 404;

/// Entries reported `httpStatus == 404`, minus malformed entries and the
/// precompile range `0x..01`-`0x..09`. Non-string labels become `None`.
pub fn select_missing(index: &Value) -> Result<Vec<AddressLabel>> {
    let Some(results) = index.get("results").and_then(Value::as_array) else {
        bail!("Unexpected Sourcify index shape: `results` must be a list");
    };

    let selected = results
        .iter()
        .filter_map(Value::as_object)
        .filter(|entry| entry.get("httpStatus").and_then(Value::as_u64) == Some(NOT_FOUND))
        .filter_map(|entry| {
            let address = entry
                .get("address")
                .and_then(Value::as_str)
                .and_then(|raw| ContractAddress::parse(raw).ok())?;
            if address.is_reserved() {
                tracing::debug!(address = %address, "skipping precompile address");
                return None;
            }
            let label = entry
                .get("label")
                .and_then(Value::as_str)
                .map(str::to_owned);
            Some(AddressLabel::new(address, label))
        })
        .collect();

    Ok(selected)
}

/// Reads the index at `path` and applies [`select_missing`].
pub fn load_missing(path: &Path) -> Result<Vec<AddressLabel>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read Sourcify index {}", path.display()))?;
    let index: Value = serde_json::from_str(&raw)
        .with_context(|| format!("Sourcify index {} is not valid JSON", path.display()))?;
    select_missing(&index).with_context(|| format!("invalid Sourcify index {}", path.display()))
}

/// Lines printed by a dry run: one per address, then a count.
pub fn dry_run_lines(entries: &[AddressLabel]) -> Vec<String> {
    let mut lines: Vec<String> = entries
        .iter()
        .map(|entry| match entry.label.as_deref() {
            Some(label) if !label.is_empty() => format!("{} {label}", entry.address),
            _ => entry.address.to_string(),
        })
        .collect();
    lines.push(format!(
        "Would fetch {} addresses from Etherscan v2.",
        entries.len()
    ));
    lines
}

/// What the Etherscan stage does with a Sourcify index.
#[derive(Debug)]
pub enum EtherscanPlan {
    /// Lines to print. Nothing is fetched and nothing is written.
    DryRun(Vec<String>),
    Fetch {
        service: EtherscanService,
        entries: Vec<AddressLabel>,
    },
}

/// Checks the API key before touching the index or the network, then reads
/// the missing addresses. A dry run needs no key.
pub fn plan_etherscan(
    config: &FetchConfig,
    sourcify_index: &Path,
    api_key: &str,
    dry_run: bool,
) -> Result<EtherscanPlan> {
    if !dry_run {
        require_api_key(api_key)?;
    }

    let entries = load_missing(sourcify_index)?;
    if dry_run {
        return Ok(EtherscanPlan::DryRun(dry_run_lines(&entries)));
    }

    let client = JsonHttpClient::from_config(config)?;
    let service = EtherscanService::new(client, config, api_key)?;
    Ok(EtherscanPlan::Fetch { service, entries })
}
