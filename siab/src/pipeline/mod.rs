//! Pipeline execution.
//!
//! This module provides:
//! - Ordered, validated step registries
//! - The sequential executor and its observers
//! - Failure tolerance per pipeline mode
//! - Cancellation and bounded waits

mod cancellation;
mod executor;
mod failure_tolerance;
mod poll;
mod registry;

#[cfg(test)]
mod integration_tests;

pub use cancellation::CancellationToken;
pub use executor::{Executor, RunObserver, RunResult};
pub use failure_tolerance::{FailureCollector, FailureMode, FailureRecord};
pub use poll::{bounded, poll_until, PollConfig};
pub use registry::{GuardPolicy, RegistryBuilder, StepRegistry};
