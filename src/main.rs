use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use contract_sources::http::options::DEFAULT_MAX_RETRIES;
use contract_sources::runtime::config::{
    DEFAULT_CHAIN_ID, DEFAULT_ETHERSCAN_URL, DEFAULT_OUTPUT_ROOT, DEFAULT_SOURCIFY_URL,
};
use contract_sources::services::sourcify::INDEX_FILE as SOURCIFY_INDEX_FILE;
use contract_sources::sources::materialize::ensure_dir;
use contract_sources::{
    load_address_labels, plan_etherscan, EtherscanPlan, FetchConfig, FetchConfigBuilder,
    FetchObserver, FetchResult, JsonHttpClient, Orchestrator, SourcifyService,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

const DEFAULT_LOG_DIRECTIVE: &str = "warn";
const DEFAULT_INPUT: &str = "sources/address-label.json";

#[derive(Debug, Parser)]
#[command(
    name = "contract-sources",
    version,
    about = "Download verified contract sources from Sourcify and Etherscan"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Download verified sources from Sourcify for a labeled address list.
    Sourcify(SourcifyArgs),
    /// Download sources from Etherscan v2 for addresses Sourcify reported missing.
    Etherscan(EtherscanArgs),
}

#[derive(Debug, Args)]
struct HttpArgs {
    #[arg(long, default_value_t = DEFAULT_CHAIN_ID)]
    chain_id: u64,

    /// Per-request timeout in seconds.
    #[arg(long, default_value_t = 30.0, value_name = "SECONDS")]
    timeout_s: f64,

    /// Retries after the first attempt for transient failures.
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    retries: usize,

    /// Backoff base in seconds; attempt `n` sleeps `base * 2^n`.
    #[arg(long, default_value_t = 1.0, value_name = "SECONDS")]
    backoff_s: f64,
}

#[derive(Debug, Args)]
struct SourcifyArgs {
    #[command(flatten)]
    http: HttpArgs,

    /// JSON array of `{address, label}` objects.
    #[arg(long, default_value = DEFAULT_INPUT, value_name = "PATH")]
    input: PathBuf,

    #[arg(long, default_value = DEFAULT_OUTPUT_ROOT, value_name = "PATH")]
    output_dir: PathBuf,

    /// Concurrent requests; defaults to min(12, CPU count).
    #[arg(long)]
    max_workers: Option<usize>,

    #[arg(long, default_value = DEFAULT_SOURCIFY_URL, value_name = "URL")]
    sourcify_url: String,
}

#[derive(Debug, Args)]
struct EtherscanArgs {
    #[command(flatten)]
    http: HttpArgs,

    /// Index written by the `sourcify` command; defaults to `index.json`
    /// under the output root.
    #[arg(long, value_name = "PATH")]
    sourcify_index: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_OUTPUT_ROOT, value_name = "PATH")]
    output_root: PathBuf,

    #[arg(long, env = "ETHERSCAN_API_KEY", default_value = "", hide_env_values = true)]
    api_key: String,

    /// Only print the addresses that would be fetched.
    #[arg(long)]
    dry_run: bool,

    /// Delay before every request, in seconds.
    #[arg(long, default_value_t = 0.2, value_name = "SECONDS")]
    throttle_s: f64,

    #[arg(long, default_value = DEFAULT_ETHERSCAN_URL, value_name = "URL")]
    etherscan_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_cli_tracing();

    match Cli::parse().command {
        Command::Sourcify(args) => run_sourcify(args).await,
        Command::Etherscan(args) => run_etherscan(args).await,
    }
}

fn init_cli_tracing() {
    if env::var_os("RUST_LOG").is_none() {
        env::set_var("RUST_LOG", DEFAULT_LOG_DIRECTIVE);
    }
    contract_sources::init_tracing();
}

async fn run_sourcify(args: SourcifyArgs) -> Result<()> {
    let mut builder = http_builder(&args.http)?
        .output_root(&args.output_dir)
        .sourcify_url(&args.sourcify_url);
    if let Some(workers) = args.max_workers {
        builder = builder.worker_count(workers);
    }
    let config = builder.build()?;

    let entries = load_address_labels(&args.input)?;
    ensure_dir(config.output_root()).await?;

    let service = SourcifyService::new(JsonHttpClient::from_config(&config)?, &config);
    let orchestrator =
        Orchestrator::concurrent(service, &config).with_observer(progress_observer("contracts")?);

    let index = orchestrator
        .run(entries)
        .await?
        .with_field("input", display(&args.input))
        .with_field("outputDir", display(&args.output_dir));
    orchestrator.write_index(&index).await?;

    println!(
        "Downloaded {}/{} contracts into {}",
        index.downloaded,
        index.total,
        config.output_root().display()
    );
    Ok(())
}

async fn run_etherscan(args: EtherscanArgs) -> Result<()> {
    let config = http_builder(&args.http)?
        .output_root(&args.output_root)
        .throttle(seconds(args.throttle_s, "--throttle-s")?)
        .etherscan_url(&args.etherscan_url)
        .build()?;

    let sourcify_index = args
        .sourcify_index
        .unwrap_or_else(|| args.output_root.join(SOURCIFY_INDEX_FILE));

    let (service, entries) =
        match plan_etherscan(&config, &sourcify_index, &args.api_key, args.dry_run)? {
            EtherscanPlan::DryRun(lines) => {
                for line in lines {
                    println!("{line}");
                }
                return Ok(());
            }
            EtherscanPlan::Fetch { service, entries } => (service, entries),
        };

    let orchestrator =
        Orchestrator::sequential(service, &config).with_observer(progress_observer("addresses")?);

    let index = orchestrator.run(entries).await?;
    let attempted = index.total;
    let index = index
        .with_field("sourcifyIndex", display(&sourcify_index))
        .with_field("outputRoot", display(&args.output_root))
        .with_field("totalAttempted", attempted);
    orchestrator.write_index(&index).await?;

    println!(
        "Etherscan downloaded sources for {}/{} attempted addresses.",
        index.downloaded, attempted
    );
    Ok(())
}

fn http_builder(args: &HttpArgs) -> Result<FetchConfigBuilder> {
    Ok(FetchConfig::builder()
        .chain_id(args.chain_id)
        .request_timeout(seconds(args.timeout_s, "--timeout-s")?)
        .max_retries(args.retries)
        .backoff_base(seconds(args.backoff_s, "--backoff-s")?))
}

fn seconds(value: f64, flag: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("{flag} must be a non-negative number of seconds"))
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn progress_observer(unit: &str) -> Result<Arc<dyn FetchObserver>> {
    let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr_with_hz(12));
    let style = ProgressStyle::with_template(&format!(
        "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} {unit} {{msg}}"
    ))
    .context("invalid progress bar template")?
    .progress_chars("=>-");
    bar.set_style(style);
    Ok(Arc::new(ProgressObserver { bar }))
}

struct ProgressObserver {
    bar: ProgressBar,
}

impl FetchObserver for ProgressObserver {
    fn on_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.enable_steady_tick(Duration::from_millis(120));
    }

    fn on_result(&self, result: &FetchResult) {
        self.bar.set_message(result.address.clone());
        self.bar.inc(1);
    }

    fn on_finish(&self) {
        self.bar.finish_and_clear();
    }
}
