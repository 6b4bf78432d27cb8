//! Context handed to every step.
//!
//! This module provides:
//! - The run identity (id, mode, start time)
//! - The immutable execution context carrying configuration and the log sink

mod execution;
mod identity;

pub use execution::ExecutionContext;
pub use identity::RunIdentity;
