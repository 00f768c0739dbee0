use crate::sources::manifest::{CountingRule, FetchResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Run counters updated as each contract completes.
#[derive(Default, Debug)]
pub struct Telemetry {
    completed: AtomicU64,
    downloaded: AtomicU64,
    missing: AtomicU64,
    errors: AtomicU64,
    files_saved: AtomicU64,
}

impl Telemetry {
    pub fn record_result(&self, result: &FetchResult, counting: CountingRule) {
        let counts = counting.classify(result);
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.downloaded
            .fetch_add(counts.downloaded as u64, Ordering::Relaxed);
        self.missing.fetch_add(counts.missing as u64, Ordering::Relaxed);
        self.errors.fetch_add(counts.errors as u64, Ordering::Relaxed);
        self.files_saved
            .fetch_add(result.files_saved as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            downloaded: self.downloaded.load(Ordering::Relaxed),
            missing: self.missing.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            files_saved: self.files_saved.load(Ordering::Relaxed),
        }
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub completed: u64,
    pub downloaded: u64,
    pub missing: u64,
    pub errors: u64,
    pub files_saved: u64,
}

/// Spawns a background task that periodically logs completion rate and outcome counters.
pub fn spawn_progress_reporter(
    service: &'static str,
    total: usize,
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; nothing has completed yet.
        ticker.tick().await;

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!(target: "contract_sources::progress", service, "progress reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let delta = current.completed.saturating_sub(last_snapshot.completed);
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let rate = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "contract_sources::progress",
                        service,
                        completed = current.completed,
                        total,
                        rate = format!("{rate:.2}"),
                        downloaded = current.downloaded,
                        missing = current.missing,
                        errors = current.errors,
                        files_saved = current.files_saved,
                        "fetch progress"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
