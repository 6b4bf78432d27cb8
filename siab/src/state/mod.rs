//! Persisted run state: the status artifact and the execution log.
//!
//! Neither is read back by the executor. The live system stays the only
//! source of truth for what a rerun does; these files exist for the
//! operator.

mod artifact;
mod log;

pub use artifact::{status_path, StatusArtifact, StatusWriter};
pub use log::{ExecutionLogSink, EXECUTION_LOG};
