//! Step trait and implementations.
//!
//! Steps are the units of work in an orchestrator pipeline. Each one pairs a
//! read-only probe ("does the desired state already hold?") with a mutating
//! apply and an optional post-condition check.

mod fn_step;
mod guarded;

pub use fn_step::FnStep;
pub use guarded::{with_safety_guard, SafetyGuarded};

use crate::context::ExecutionContext;
use crate::core::Mutation;
use crate::errors::StepError;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline steps.
///
/// The executor calls [`probe`](Step::probe) first and only calls
/// [`apply`](Step::apply) when the probe does not report the desired state
/// as already satisfied. The apply is not required to check for prior
/// state itself, but must be safe to run again after a partial failure.
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Stable identifier, unique within a registry.
    fn id(&self) -> &str;

    /// Human-readable description for the summary table.
    fn description(&self) -> &str {
        self.id()
    }

    /// What the apply mutates.
    fn mutation(&self) -> Mutation {
        Mutation::Local
    }

    /// Reports whether the desired state already holds.
    ///
    /// Must be read-only, bounded in time and safe to call any number of
    /// times. The default reports "not satisfied", which makes the step run
    /// on every invocation; keep that for naturally idempotent, additive
    /// work only.
    async fn probe(&self, _ctx: &ExecutionContext) -> Result<bool, StepError> {
        Ok(false)
    }

    /// Performs the work.
    async fn apply(&self, ctx: &ExecutionContext) -> Result<(), StepError>;

    /// Checks the post-condition right after a successful apply.
    async fn verify(&self, _ctx: &ExecutionContext) -> Result<(), StepError> {
        Ok(())
    }
}
