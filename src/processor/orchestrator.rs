use crate::processor::worker_pool::{WorkerEvent, WorkerPool};
use crate::runtime::config::FetchConfig;
use crate::runtime::hooks::{FetchObserver, NoopObserver};
use crate::runtime::telemetry::{spawn_progress_reporter, Telemetry};
use crate::services::ContractSourceService;
use crate::sources::address::AddressLabel;
use crate::sources::manifest::{FetchResult, RunIndex};
use crate::sources::materialize::write_json;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// How requests are scheduled against the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Up to `workers` fetches in flight at once.
    Concurrent { workers: usize },
    /// One fetch at a time, sleeping `throttle` before each request.
    Sequential { throttle: Duration },
}

/// Runs one fetch cycle per address and gathers the outcomes into a
/// [`RunIndex`] whose order never depends on completion order.
pub struct Orchestrator<S: ContractSourceService> {
    service: Arc<S>,
    schedule: Schedule,
    telemetry: Arc<Telemetry>,
    observer: Arc<dyn FetchObserver>,
    progress_interval: Duration,
}

impl<S: ContractSourceService> Orchestrator<S> {
    pub fn new(service: S, schedule: Schedule) -> Self {
        Self {
            service: Arc::new(service),
            schedule,
            telemetry: Arc::new(Telemetry::default()),
            observer: Arc::new(NoopObserver),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn concurrent(service: S, config: &FetchConfig) -> Self {
        Self::new(
            service,
            Schedule::Concurrent {
                workers: config.worker_count(),
            },
        )
        .with_progress_interval(config.progress_interval())
    }

    pub fn sequential(service: S, config: &FetchConfig) -> Self {
        Self::new(
            service,
            Schedule::Sequential {
                throttle: config.throttle(),
            },
        )
        .with_progress_interval(config.progress_interval())
    }

    pub fn with_observer(mut self, observer: Arc<dyn FetchObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    /// Fetches every entry and returns the sorted index. Per-contract failures
    /// are recorded in the results; only local I/O errors and worker panics
    /// fail the run.
    pub async fn run(&self, entries: Vec<AddressLabel>) -> Result<RunIndex> {
        let total = entries.len();
        let service = self.service.name();
        tracing::info!(service, total, schedule = ?self.schedule, "starting fetch run");
        self.observer.on_start(total);

        let shutdown = CancellationToken::new();
        let reporter = spawn_progress_reporter(
            service,
            total,
            self.telemetry.clone(),
            shutdown.clone(),
            self.progress_interval,
        );

        let outcome = match self.schedule {
            Schedule::Concurrent { workers } => {
                self.run_concurrent(entries, workers, shutdown.child_token())
                    .await
            }
            Schedule::Sequential { throttle } => self.run_sequential(&entries, throttle).await,
        };

        shutdown.cancel();
        let _ = reporter.await;
        self.observer.on_finish();

        let results = outcome?;
        let index = RunIndex::new(self.service.chain_id(), results, self.service.counting());
        let snapshot = self.telemetry.snapshot();
        tracing::info!(
            service,
            total = index.total,
            downloaded = index.downloaded,
            missing = index.missing,
            errors = index.errors,
            files_saved = snapshot.files_saved,
            "fetch run finished"
        );
        Ok(index)
    }

    /// Writes `index` to the service's index file at the output root.
    pub async fn write_index(&self, index: &RunIndex) -> Result<PathBuf> {
        let path = self
            .service
            .output_root()
            .join(self.service.index_file());
        write_json(&path, index)
            .await
            .with_context(|| format!("failed to write run index {}", path.display()))?;
        Ok(path)
    }

    async fn run_concurrent(
        &self,
        entries: Vec<AddressLabel>,
        workers: usize,
        shutdown: CancellationToken,
    ) -> Result<Vec<FetchResult>> {
        let total = entries.len();
        let tasks: Arc<[AddressLabel]> = entries.into();
        let mut pool = WorkerPool::launch(self.service.clone(), tasks, workers, shutdown);

        let mut results = Vec::with_capacity(total);
        let mut failure: Option<anyhow::Error> = None;
        while let Some(event) = pool.next_event().await {
            match event {
                WorkerEvent::Completed(result) => {
                    self.record(&result);
                    results.push(result);
                }
                WorkerEvent::Failed { worker_id, error } => {
                    tracing::error!(worker = worker_id, error = %error, "aborting fetch run");
                    failure.get_or_insert(error);
                }
            }
        }
        pool.join().await;

        match failure {
            Some(error) => Err(error),
            None => Ok(results),
        }
    }

    async fn run_sequential(
        &self,
        entries: &[AddressLabel],
        throttle: Duration,
    ) -> Result<Vec<FetchResult>> {
        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            if !throttle.is_zero() {
                sleep(throttle).await;
            }
            let result = self.service.fetch_contract(entry).await?;
            self.record(&result);
            results.push(result);
        }
        Ok(results)
    }

    fn record(&self, result: &FetchResult) {
        self.telemetry.record_result(result, self.service.counting());
        self.observer.on_result(result);
    }
}
