//! Etherscan v2 `getsourcecode` adapter.
//!
//! Every response is snapshotted to `etherscan_response.json` before it is
//! inspected. Sources land under `sources/`, either as the files of a
//! standard-JSON bundle or as one blob named after the contract.

use crate::http::{JsonHttpClient, ETHERSCAN_RETRY};
use crate::runtime::config::FetchConfig;
use crate::services::{
    log_outcome, request_json, save_sources, ContractSourceService, FetchFuture,
};
use crate::sources::address::AddressLabel;
use crate::sources::manifest::{CountingRule, FetchResult, ServiceStatus};
use crate::sources::materialize::{ensure_dir, write_json, SourceFile};
use crate::sources::paths::{contract_dir, resolve, PathAnchor, SOURCES_DIR};
use anyhow::{bail, Context, Result};
use reqwest::Url;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "etherscan.json";
pub const RESPONSE_FILE: &str = "etherscan_response.json";
pub const INDEX_FILE: &str = "etherscan_index.json";

const REDACTED: &str = "REDACTED";
const DEFAULT_CONTRACT_NAME: &str = "contract";

const HTTP_ERROR: &str = "Unexpected HTTP response from Etherscan";
const API_ERROR: &str = "Etherscan error";
const EMPTY_RESULT: &str = "Empty Etherscan result";
const RESULT_SHAPE_ERROR: &str = "Unexpected Etherscan result shape";
const NO_SOURCE: &str = "No SourceCode in Etherscan response";

#[derive(Clone)]
pub struct EtherscanService {
    client: JsonHttpClient,
    base_url: String,
    api_key: String,
    chain_id: u64,
    output_root: PathBuf,
}

impl std::fmt::Debug for EtherscanService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtherscanService")
            .field("base_url", &self.base_url)
            .field("api_key", &REDACTED)
            .field("chain_id", &self.chain_id)
            .field("output_root", &self.output_root)
            .finish()
    }
}

impl EtherscanService {
    pub fn new(
        client: JsonHttpClient,
        config: &FetchConfig,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        let api_key = require_api_key(&api_key.into())?;

        let service = Self {
            client,
            base_url: config.etherscan_url().to_owned(),
            api_key,
            chain_id: config.chain_id(),
            output_root: config.output_root().to_path_buf(),
        };
        // Surface a malformed base URL now rather than once per contract.
        service.endpoint_with_key(REDACTED, "0x0000000000000000000000000000000000000000")?;
        Ok(service)
    }

    /// Request URL carrying the real key.
    pub fn endpoint(&self, entry: &AddressLabel) -> Result<Url> {
        self.endpoint_with_key(&self.api_key, entry.address.as_str())
    }

    /// The URL recorded in manifests, with the key replaced by `REDACTED`.
    pub fn redacted_endpoint(&self, entry: &AddressLabel) -> Result<Url> {
        self.endpoint_with_key(REDACTED, entry.address.as_str())
    }

    fn endpoint_with_key(&self, api_key: &str, address: &str) -> Result<Url> {
        let chain_id = self.chain_id.to_string();
        Url::parse_with_params(
            &self.base_url,
            &[
                ("apikey", api_key),
                ("chainid", chain_id.as_str()),
                ("module", "contract"),
                ("action", "getsourcecode"),
                ("address", address),
            ],
        )
        .with_context(|| format!("invalid Etherscan base URL {}", self.base_url))
    }

    async fn fetch(&self, entry: &AddressLabel) -> Result<FetchResult> {
        let url = self.endpoint(entry)?;
        let recorded = self.redacted_endpoint(entry)?;
        let dir = contract_dir(&self.output_root, self.chain_id, &entry.address);
        ensure_dir(&dir).await?;

        let response = request_json(&self.client, url.as_str(), &ETHERSCAN_RETRY).await;

        let mut result = FetchResult::new(
            self.chain_id,
            entry,
            recorded.as_str(),
            ServiceStatus::etherscan(),
        );
        result.http_status = response.status;

        write_json(&dir.join(RESPONSE_FILE), &response.body).await?;

        match extract_sources(response.status, &response.body) {
            Ok(extracted) => {
                result.status = extracted.status;
                let saved = save_sources(self.name(), &dir, &extracted.files).await;
                result.files_saved = saved.files_saved;
                result.error = saved.error;
            }
            Err(rejected) => {
                result.status = rejected.status;
                result.error = Some(rejected.error);
            }
        }

        write_json(&dir.join(MANIFEST_FILE), &result).await?;
        Ok(result)
    }
}

/// The trimmed key, or an error naming both ways to supply one.
pub fn require_api_key(api_key: &str) -> Result<String> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        bail!("Missing Etherscan API key. Set ETHERSCAN_API_KEY or pass --api-key.");
    }
    Ok(api_key.to_owned())
}

impl ContractSourceService for EtherscanService {
    fn name(&self) -> &'static str {
        ETHERSCAN_RETRY.service
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn output_root(&self) -> &Path {
        &self.output_root
    }

    fn index_file(&self) -> &'static str {
        INDEX_FILE
    }

    fn counting(&self) -> CountingRule {
        CountingRule::FilesSaved
    }

    fn fetch_contract<'a>(&'a self, entry: &'a AddressLabel) -> FetchFuture<'a> {
        Box::pin(async move {
            let result = self.fetch(entry).await?;
            log_outcome(self.name(), self.counting(), &result);
            Ok(result)
        })
    }
}

/// Files to write plus the API status fields for the manifest.
#[derive(Debug, PartialEq)]
struct Extracted {
    status: ServiceStatus,
    files: Vec<SourceFile>,
}

#[derive(Debug, PartialEq)]
struct Rejected {
    status: ServiceStatus,
    error: String,
}

fn extract_sources(http_status: u16, body: &Value) -> Result<Extracted, Rejected> {
    let object = match body.as_object() {
        Some(object) if http_status == 200 => object,
        _ => {
            let error = if http_status == 0 {
                transport_error(body)
            } else {
                HTTP_ERROR.to_owned()
            };
            return Err(Rejected {
                status: ServiceStatus::etherscan(),
                error,
            });
        }
    };

    let status = ServiceStatus::Etherscan {
        api_status: text_field(object, "status"),
        api_message: text_field(object, "message"),
    };
    let reject = |error: &str| Rejected {
        status: status.clone(),
        error: error.to_owned(),
    };

    if object.get("status").and_then(Value::as_str) != Some("1") {
        let error = object
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or(API_ERROR);
        return Err(reject(error));
    }

    let first = match object.get("result").and_then(Value::as_array) {
        Some(results) if !results.is_empty() => &results[0],
        _ => return Err(reject(EMPTY_RESULT)),
    };
    let Some(first) = first.as_object() else {
        return Err(reject(RESULT_SHAPE_ERROR));
    };

    let source_code = match first.get("SourceCode").and_then(Value::as_str) {
        Some(code) if !code.trim().is_empty() => code,
        _ => return Err(reject(NO_SOURCE)),
    };

    let extension = guess_extension(first);
    let files = match parse_multifile_source(source_code) {
        Some(bundle) => bundle
            .into_iter()
            .map(|(name, content)| {
                let mut relative = resolve(&name, PathAnchor::Root);
                if relative.extension().is_none() {
                    relative.set_extension(extension.trim_start_matches('.'));
                }
                SourceFile::new(Path::new(SOURCES_DIR).join(relative), content)
            })
            .collect(),
        None => {
            let name = first
                .get("ContractName")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .unwrap_or(DEFAULT_CONTRACT_NAME);
            let relative = resolve(&format!("{name}{extension}"), PathAnchor::Root);
            vec![SourceFile::new(
                Path::new(SOURCES_DIR).join(relative),
                source_code,
            )]
        }
    };

    Ok(Extracted { status, files })
}

fn transport_error(body: &Value) -> String {
    body.get("error")
        .and_then(Value::as_str)
        .unwrap_or(HTTP_ERROR)
        .to_owned()
}

/// Non-null fields keep their text; non-string values use their JSON form.
fn text_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::Null => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Reads a standard-JSON `SourceCode` bundle into `(name, content)` pairs.
///
/// Etherscan sometimes wraps the object in an extra pair of braces. Returns
/// `None` when the text is not a bundle or the bundle has no usable entries.
pub fn parse_multifile_source(source_code: &str) -> Option<Vec<(String, String)>> {
    let mut text = source_code.trim();
    if text.is_empty() {
        return None;
    }

    if text.starts_with("{{") && text.ends_with("}}") {
        text = text[1..text.len() - 1].trim();
    }

    if !(text.starts_with('{') && text.ends_with('}')) {
        return None;
    }

    let parsed: Value = serde_json::from_str(text).ok()?;
    let sources = parsed.get("sources")?.as_object()?;

    let files: Vec<(String, String)> = sources
        .iter()
        .filter(|(name, _)| !name.is_empty())
        .filter_map(|(name, entry)| {
            let content = match entry {
                Value::Object(entry) => entry.get("content")?.as_str()?,
                Value::String(content) => content.as_str(),
                _ => return None,
            };
            Some((name.clone(), content.to_owned()))
        })
        .collect();

    if files.is_empty() {
        None
    } else {
        Some(files)
    }
}

/// `.sol`, `.vy`, or `.txt` from `CompilerType`, falling back to a fuzzy
/// match on `CompilerVersion`.
pub fn guess_extension(result: &Map<String, Value>) -> &'static str {
    let field = |key: &str| {
        result
            .get(key)
            .and_then(Value::as_str)
            .map(|value| value.trim().to_ascii_lowercase())
            .unwrap_or_default()
    };

    match field("CompilerType").as_str() {
        "vyper" => return ".vy",
        "solc" => return ".sol",
        _ => {}
    }

    let version = field("CompilerVersion");
    if version.contains("vyper") {
        ".vy"
    } else if version.starts_with('v') || version.contains("solc") {
        ".sol"
    } else {
        ".txt"
    }
}
