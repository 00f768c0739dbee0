use crate::sources::manifest::FetchResult;

/// Callbacks invoked by the orchestrator as a run progresses. Used by the CLI
/// to drive a progress bar; every method defaults to a no-op.
pub trait FetchObserver: Send + Sync {
    fn on_start(&self, _total: usize) {}

    fn on_result(&self, _result: &FetchResult) {}

    fn on_finish(&self) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl FetchObserver for NoopObserver {}
