//! Bounded pool of fetch workers draining a shared, immutable task list.
//!
//! Workers claim entries through an atomic cursor and report each outcome on
//! an unbounded channel. A local I/O error or a panic in any worker cancels
//! the pool so no further entries are claimed.

use crate::services::ContractSourceService;
use crate::sources::address::AddressLabel;
use crate::sources::manifest::FetchResult;
use futures::FutureExt;
use std::{
    any::Any,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub(crate) enum WorkerEvent {
    Completed(FetchResult),
    Failed { worker_id: usize, error: anyhow::Error },
}

pub(crate) struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
}

impl WorkerPool {
    /// Spawns `min(max_workers, tasks.len())` workers. No worker is spawned for
    /// an empty task list.
    pub(crate) fn launch<S: ContractSourceService>(
        service: Arc<S>,
        tasks: Arc<[AddressLabel]>,
        max_workers: usize,
        shutdown: CancellationToken,
    ) -> Self {
        let (event_tx, events) = mpsc::unbounded_channel();
        let cursor = Arc::new(AtomicUsize::new(0));
        let workers = max_workers.max(1).min(tasks.len());

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let service = service.clone();
            let tasks = tasks.clone();
            let cursor = cursor.clone();
            let event_tx = event_tx.clone();
            let shutdown = shutdown.clone();

            let handle = tokio::spawn(async move {
                let run = run_worker(
                    worker_id,
                    service,
                    tasks,
                    cursor,
                    event_tx.clone(),
                    shutdown.clone(),
                );
                let result = std::panic::AssertUnwindSafe(run).catch_unwind().await;

                if let Err(panic_payload) = result {
                    let panic_msg = panic_message(panic_payload.as_ref());
                    tracing::error!(
                        worker = worker_id,
                        panic = %panic_msg,
                        "worker task panicked"
                    );
                    let error = anyhow::anyhow!("worker {worker_id} panicked: {panic_msg}");
                    let _ = event_tx.send(WorkerEvent::Failed { worker_id, error });
                    shutdown.cancel();
                }
            });
            handles.push(handle);
        }

        tracing::debug!(workers, tasks = tasks.len(), "worker pool launched");
        Self { handles, events }
    }

    /// Next event, or `None` once every worker has exited.
    pub(crate) async fn next_event(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }

    pub(crate) async fn join(self) {
        for handle in self.handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "worker task did not complete cleanly");
            }
        }
    }
}

async fn run_worker<S: ContractSourceService>(
    worker_id: usize,
    service: Arc<S>,
    tasks: Arc<[AddressLabel]>,
    cursor: Arc<AtomicUsize>,
    event_tx: mpsc::UnboundedSender<WorkerEvent>,
    shutdown: CancellationToken,
) {
    while !shutdown.is_cancelled() {
        let index = cursor.fetch_add(1, Ordering::SeqCst);
        let Some(entry) = tasks.get(index) else {
            break;
        };

        match service.fetch_contract(entry).await {
            Ok(result) => {
                if event_tx.send(WorkerEvent::Completed(result)).is_err() {
                    break;
                }
            }
            Err(err) => {
                tracing::error!(
                    worker = worker_id,
                    address = %entry.address,
                    error = %err,
                    "worker task exited with error"
                );
                let error = err.context(format!("worker {worker_id} exited with error"));
                let _ = event_tx.send(WorkerEvent::Failed { worker_id, error });
                shutdown.cancel();
                break;
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
