use crate::support::{
    helpers::{contract_dir, entry, init_tracing, read_json, repeated_address, test_config},
    mock_http::{MockHttpServer, MockReply},
};
use anyhow::Result;
use contract_sources::{
    ContractSourceService, EtherscanService, FetchConfig, JsonHttpClient, Orchestrator, Schedule,
};
use serde_json::json;

const API_KEY: &str = "sekret-key";

fn service(config: &FetchConfig) -> Result<EtherscanService> {
    EtherscanService::new(JsonHttpClient::from_config(config)?, config, API_KEY)
}

fn ok_reply(first: serde_json::Value) -> MockReply {
    MockReply::json(
        200,
        json!({"status": "1", "message": "OK", "result": [first]}),
    )
}

#[tokio::test]
async fn multi_file_bundle_lands_under_sources() -> Result<()> {
    init_tracing();
    let server = MockHttpServer::start().await?;
    let root = tempfile::tempdir()?;
    let address = repeated_address('a');
    let bundle = r#"{"language":"Solidity","sources":{"A.sol":{"content":"pragma ..."}}}"#;
    server.script(
        &address,
        vec![ok_reply(json!({
            "SourceCode": bundle,
            "ContractName": "A",
            "CompilerVersion": "v0.8.20+commit.a1b79de6",
        }))],
    );

    let config = test_config(root.path(), server.url());
    let result = service(&config)?
        .fetch_contract(&entry(&address, Some("Router")))
        .await?;

    assert_eq!(result.files_saved, 1);
    assert!(result.error.is_none());

    let dir = contract_dir(root.path(), &address);
    assert_eq!(
        std::fs::read_to_string(dir.join("sources/A.sol"))?,
        "pragma ..."
    );

    let manifest = read_json(&dir.join("etherscan.json"))?;
    assert_eq!(manifest["apiStatus"], "1");
    assert_eq!(manifest["apiMessage"], "OK");
    assert_eq!(manifest["filesSaved"], 1);
    assert_eq!(manifest["label"], "Router");
    assert!(manifest.get("status").is_none());

    let snapshot = read_json(&dir.join("etherscan_response.json"))?;
    assert_eq!(snapshot["result"][0]["ContractName"], "A");

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn api_key_is_sent_but_never_recorded() -> Result<()> {
    init_tracing();
    let server = MockHttpServer::start().await?;
    let root = tempfile::tempdir()?;
    let address = repeated_address('b');
    server.script(
        &address,
        vec![ok_reply(json!({"SourceCode": "contract B {}", "ContractName": "B", "CompilerType": "solc"}))],
    );

    let config = test_config(root.path(), server.url());
    service(&config)?
        .fetch_contract(&entry(&address, None))
        .await?;

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let query = &requests[0].path_and_query;
    assert!(query.starts_with("/v2/api?"), "{query}");
    assert!(query.contains(&format!("apikey={API_KEY}")), "{query}");
    assert!(query.contains("chainid=1"), "{query}");
    assert!(query.contains("module=contract"), "{query}");
    assert!(query.contains("action=getsourcecode"), "{query}");

    let dir = contract_dir(root.path(), &address);
    assert_eq!(
        std::fs::read_to_string(dir.join("sources/B.sol"))?,
        "contract B {}"
    );
    let manifest_text = std::fs::read_to_string(dir.join("etherscan.json"))?;
    assert!(!manifest_text.contains(API_KEY));
    let manifest: serde_json::Value = serde_json::from_str(&manifest_text)?;
    assert!(manifest["endpoint"]
        .as_str()
        .is_some_and(|endpoint| endpoint.contains("apikey=REDACTED")));

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn api_errors_still_snapshot_the_response() -> Result<()> {
    init_tracing();
    let server = MockHttpServer::start().await?;
    let root = tempfile::tempdir()?;
    let address = repeated_address('c');
    server.script(
        &address,
        vec![MockReply::json(
            200,
            json!({"status": "0", "message": "NOTOK", "result": "Invalid API Key"}),
        )],
    );

    let config = test_config(root.path(), server.url());
    let result = service(&config)?
        .fetch_contract(&entry(&address, None))
        .await?;

    assert_eq!(result.error.as_deref(), Some("Invalid API Key"));
    assert_eq!(result.files_saved, 0);

    let dir = contract_dir(root.path(), &address);
    assert_eq!(
        read_json(&dir.join("etherscan_response.json"))?["message"],
        "NOTOK"
    );
    let manifest = read_json(&dir.join("etherscan.json"))?;
    assert_eq!(manifest["apiStatus"], "0");
    assert_eq!(manifest["error"], "Invalid API Key");

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn not_found_is_retried_then_recorded() -> Result<()> {
    init_tracing();
    let server = MockHttpServer::start().await?;
    let root = tempfile::tempdir()?;
    let address = repeated_address('d');
    server.script(&address, vec![MockReply::raw(404, "gone")]);

    let config = test_config(root.path(), server.url());
    let result = service(&config)?
        .fetch_contract(&entry(&address, None))
        .await?;

    assert_eq!(server.hits(&address), 3);
    assert_eq!(result.http_status, 404);
    assert_eq!(
        result.error.as_deref(),
        Some("Unexpected HTTP response from Etherscan")
    );

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn sequential_run_counts_by_files_saved() -> Result<()> {
    init_tracing();
    let server = MockHttpServer::start().await?;
    let root = tempfile::tempdir()?;

    let vyper = repeated_address('2');
    server.script(
        &vyper,
        vec![ok_reply(json!({"SourceCode": "# @version 0.3.7", "ContractName": "", "CompilerVersion": "vyper:0.3.7"}))],
    );
    let empty = repeated_address('1');
    server.script(
        &empty,
        vec![MockReply::json(200, json!({"status": "1", "message": "OK", "result": []}))],
    );

    let config = test_config(root.path(), server.url());
    let orchestrator = Orchestrator::sequential(service(&config)?, &config);
    assert!(matches!(orchestrator.schedule(), Schedule::Sequential { .. }));

    let index = orchestrator
        .run(vec![entry(&vyper, None), entry(&empty, None)])
        .await?;
    let attempted = index.total;
    let index = index.with_field("totalAttempted", attempted);
    let path = orchestrator.write_index(&index).await?;

    assert_eq!(path, root.path().join("etherscan_index.json"));
    assert_eq!(index.downloaded, 1);
    assert_eq!(index.errors, 1);
    assert_eq!(index.missing, 0);
    assert_eq!(index.results[0].address, empty);
    assert_eq!(index.results[0].error.as_deref(), Some("Empty Etherscan result"));

    let dir = contract_dir(root.path(), &vyper);
    assert_eq!(
        std::fs::read_to_string(dir.join("sources/contract.vy"))?,
        "# @version 0.3.7"
    );

    let written = read_json(&path)?;
    assert_eq!(written["totalAttempted"], 2);
    assert_eq!(written["downloaded"], 1);

    server.shutdown().await;
    Ok(())
}

#[test]
fn blank_api_key_is_rejected() {
    let root = tempfile::tempdir().expect("tempdir");
    let config = test_config(root.path(), "http://127.0.0.1:9");
    let client = JsonHttpClient::from_config(&config).expect("client");
    let err = EtherscanService::new(client, &config, "  ").unwrap_err();
    assert!(err.to_string().contains("Missing Etherscan API key"));
}
