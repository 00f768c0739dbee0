//! Run orchestration: the bounded worker pool, the orchestrator that drives a
//! service over a batch, and reconciliation between the two stages.

pub mod orchestrator;
pub mod reconcile;
pub mod worker_pool;
