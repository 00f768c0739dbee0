use crate::support::{
    helpers::{
        contract_dir, entry, init_tracing, read_json, repeated_address, sourcify_path,
        test_config,
    },
    mock_http::{MockHttpServer, MockReply},
};
use anyhow::Result;
use contract_sources::{
    dry_run_lines, load_missing, plan_etherscan, EtherscanPlan, EtherscanService, JsonHttpClient,
    Orchestrator, SourcifyService,
};
use std::path::Path;
use serde_json::json;

#[tokio::test]
async fn sourcify_misses_feed_the_etherscan_stage() -> Result<()> {
    init_tracing();
    let server = MockHttpServer::start().await?;
    let root = tempfile::tempdir()?;

    let verified = repeated_address('a');
    let missing = repeated_address('b');
    let precompile = "0x0000000000000000000000000000000000000004";
    server.script(
        &sourcify_path(&verified),
        vec![MockReply::json(
            200,
            json!({"status": "full", "files": [{"name": "V.sol", "content": "v"}]}),
        )],
    );
    for address in [missing.as_str(), precompile] {
        server.script(
            &sourcify_path(address),
            vec![MockReply::json(404, json!({"error": "missing"}))],
        );
    }

    let config = test_config(root.path(), server.url());
    let sourcify = Orchestrator::concurrent(
        SourcifyService::new(JsonHttpClient::from_config(&config)?, &config),
        &config,
    );
    let index = sourcify
        .run(vec![
            entry(&verified, Some("Verified")),
            entry(&missing, Some("Missing")),
            entry(precompile, Some("ecrecover-ish")),
        ])
        .await?;
    let index_path = sourcify.write_index(&index).await?;
    assert_eq!(index.missing, 2);

    let batch = load_missing(&index_path)?;
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].address.as_str(), missing.to_ascii_lowercase());
    assert_eq!(batch[0].label.as_deref(), Some("Missing"));
    assert_eq!(
        dry_run_lines(&batch),
        vec![
            format!("{} Missing", missing.to_ascii_lowercase()),
            "Would fetch 1 addresses from Etherscan v2.".to_owned(),
        ]
    );

    server.script(
        &missing,
        vec![MockReply::json(
            200,
            json!({"status": "1", "message": "OK", "result": [{
                "SourceCode": "contract M {}",
                "ContractName": "M",
                "CompilerType": "solc",
            }]}),
        )],
    );

    let etherscan = Orchestrator::sequential(
        EtherscanService::new(JsonHttpClient::from_config(&config)?, &config, "key")?,
        &config,
    );
    let index = etherscan.run(batch).await?;
    etherscan.write_index(&index).await?;

    assert_eq!(index.downloaded, 1);
    assert_eq!(index.results[0].label.as_deref(), Some("Missing"));
    let dir = contract_dir(root.path(), &missing);
    assert_eq!(
        std::fs::read_to_string(dir.join("sources/M.sol"))?,
        "contract M {}"
    );
    // Both stages share the contract directory without clobbering each other.
    assert!(dir.join("sourcify.json").exists());
    assert!(dir.join("sourcify_error.json").exists());
    assert_eq!(read_json(&dir.join("etherscan.json"))?["filesSaved"], 1);

    server.shutdown().await;
    Ok(())
}

#[test]
fn malformed_index_file_is_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("index.json");
    std::fs::write(&path, "{\"results\": \"nope\"}").expect("write index");

    let err = load_missing(&path).unwrap_err();
    assert!(format!("{err:#}").contains("results"));

    let err = load_missing(&dir.path().join("absent.json")).unwrap_err();
    assert!(err.to_string().contains("failed to read Sourcify index"));
}

fn write_index(path: &Path, address: &str) {
    let index = json!({"results": [
        {"address": address, "httpStatus": 404, "label": "Pool"},
        {"address": repeated_address('9'), "httpStatus": 200},
    ]});
    std::fs::write(path, index.to_string()).expect("write index");
}

#[tokio::test]
async fn missing_api_key_aborts_before_any_io() -> Result<()> {
    init_tracing();
    let server = MockHttpServer::start().await?;
    let root = tempfile::tempdir()?;
    let output_root = root.path().join("out");
    let config = test_config(&output_root, server.url());

    // The index does not exist: reading it first would fail differently.
    let err = plan_etherscan(&config, &root.path().join("absent.json"), " ", false).unwrap_err();
    assert!(err.to_string().contains("Missing Etherscan API key"));

    assert_eq!(server.total_hits(), 0);
    assert!(!output_root.exists());

    server.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn dry_run_needs_no_key_and_touches_nothing() -> Result<()> {
    init_tracing();
    let server = MockHttpServer::start().await?;
    let root = tempfile::tempdir()?;
    let output_root = root.path().join("out");
    let index_path = root.path().join("index.json");
    let address = repeated_address('4');
    write_index(&index_path, &address);

    let config = test_config(&output_root, server.url());
    let plan = plan_etherscan(&config, &index_path, "", true)?;

    let lines = match plan {
        EtherscanPlan::DryRun(lines) => lines,
        other => panic!("expected a dry run plan, got {other:?}"),
    };
    assert_eq!(
        lines,
        vec![
            format!("{address} Pool"),
            "Would fetch 1 addresses from Etherscan v2.".to_owned(),
        ]
    );
    assert_eq!(server.total_hits(), 0);
    assert!(!output_root.exists());

    let plan = plan_etherscan(&config, &index_path, "key", false)?;
    let entries = match plan {
        EtherscanPlan::Fetch { entries, .. } => entries,
        other => panic!("expected a fetch plan, got {other:?}"),
    };
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].label.as_deref(), Some("Pool"));
    assert_eq!(server.total_hits(), 0);
    assert!(!output_root.exists());

    server.shutdown().await;
    Ok(())
}
