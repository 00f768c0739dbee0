//! Runtime glue: validated configuration, run observers, tracing, and
//! progress telemetry.

pub mod config;
pub mod hooks;
pub mod telemetry;
