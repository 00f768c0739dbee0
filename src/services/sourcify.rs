use crate::http::{JsonHttpClient, SOURCIFY_RETRY};
use crate::runtime::config::FetchConfig;
use crate::services::{
    log_outcome, request_json, save_sources, ContractSourceService, FetchFuture,
};
use crate::sources::address::AddressLabel;
use crate::sources::manifest::{CountingRule, FetchResult, ServiceStatus};
use crate::sources::materialize::{ensure_dir, remove_if_exists, write_json, SourceFile};
use crate::sources::paths::{contract_dir, relocate_reserved, resolve, PathAnchor};
use anyhow::Result;
use serde_json::Value;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "sourcify.json";
pub const ERROR_FILE: &str = "sourcify_error.json";
pub const INDEX_FILE: &str = "index.json";

const RESERVED: &[&str] = &[MANIFEST_FILE, ERROR_FILE];
const SHAPE_ERROR: &str = "Unexpected Sourcify response shape";

/// Sourcify `files/any` adapter.
#[derive(Debug, Clone)]
pub struct SourcifyService {
    client: JsonHttpClient,
    base_url: String,
    chain_id: u64,
    output_root: PathBuf,
}

impl SourcifyService {
    pub fn new(client: JsonHttpClient, config: &FetchConfig) -> Self {
        Self {
            client,
            base_url: config.sourcify_url().trim_end_matches('/').to_owned(),
            chain_id: config.chain_id(),
            output_root: config.output_root().to_path_buf(),
        }
    }

    /// `{base}/files/any/{chain}/{address}` with the address spelled as given.
    pub fn endpoint(&self, entry: &AddressLabel) -> String {
        format!(
            "{}/files/any/{}/{}",
            self.base_url,
            self.chain_id,
            entry.address.as_str()
        )
    }

    async fn fetch(&self, entry: &AddressLabel) -> Result<FetchResult> {
        let endpoint = self.endpoint(entry);
        let dir = contract_dir(&self.output_root, self.chain_id, &entry.address);
        ensure_dir(&dir).await?;

        let response = request_json(&self.client, &endpoint, &SOURCIFY_RETRY).await;

        let mut result =
            FetchResult::new(self.chain_id, entry, endpoint, ServiceStatus::sourcify());
        result.http_status = response.status;

        if !response.is_ok() {
            result.error = Some(error_message(response.status, &response.body));
            write_json(&dir.join(ERROR_FILE), &response.body).await?;
            write_json(&dir.join(MANIFEST_FILE), &result).await?;
            return Ok(result);
        }

        let Some((status, files)) = verified_files(&response.body) else {
            result.error = Some(SHAPE_ERROR.to_owned());
            write_json(&dir.join(ERROR_FILE), &response.body).await?;
            write_json(&dir.join(MANIFEST_FILE), &result).await?;
            return Ok(result);
        };

        result.status = ServiceStatus::Sourcify {
            status: Some(status.to_owned()),
        };
        remove_if_exists(&dir.join(ERROR_FILE)).await?;

        let sources: Vec<SourceFile> = files
            .iter()
            .filter_map(|file| source_file(file, entry.address.as_str()))
            .collect();
        let saved = save_sources(self.name(), &dir, &sources).await;
        result.files_saved = saved.files_saved;
        result.error = saved.error;
        write_json(&dir.join(MANIFEST_FILE), &result).await?;
        Ok(result)
    }
}

impl ContractSourceService for SourcifyService {
    fn name(&self) -> &'static str {
        SOURCIFY_RETRY.service
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
        CountingRule::HttpStatus
    }

    fn fetch_contract<'a>(&'a self, entry: &'a AddressLabel) -> FetchFuture<'a> {
        Box::pin(async move {
            let result = self.fetch(entry).await?;
            log_outcome(self.name(), self.counting(), &result);
            Ok(result)
        })
    }
}

/// The body's `error` field for objects, the whole body rendered as text
/// otherwise.
fn error_message(status: u16, body: &Value) -> String {
    match body {
        Value::Object(object) => match object.get("error") {
            Some(Value::String(message)) => message.clone(),
            Some(Value::Null) | None => format!("HTTP status {status}"),
            Some(other) => other.to_string(),
        },
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// `status` must be `full` or `partial` and `files` a list.
fn verified_files(body: &Value) -> Option<(&str, &Vec<Value>)> {
    let status = body.get("status").and_then(Value::as_str)?;
    if status != "full" && status != "partial" {
        return None;
    }
    let files = body.get("files").and_then(Value::as_array)?;
    Some((status, files))
}

/// Entries without string content or a non-empty `path`/`name` are skipped.
fn source_file(file: &Value, address: &str) -> Option<SourceFile> {
    let object = file.as_object()?;
    let content = object.get("content").and_then(Value::as_str)?;
    let raw_path = ["path", "name"]
        .iter()
        .filter_map(|key| object.get(*key).and_then(Value::as_str))
        .find(|path| !path.is_empty())?;

    let relative = relocate_reserved(resolve(raw_path, PathAnchor::Address(address)), RESERVED);
    Some(SourceFile::new(relative, content))
}
