//! Safety guard wrapper.

use super::Step;
use crate::context::ExecutionContext;
use crate::core::Mutation;
use crate::errors::StepError;
use crate::safety::{GuardPhase, SafetyGuard};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::error;

/// A step whose apply is bracketed by keep-alive assertions.
///
/// A failing pre-check means the inner apply never runs. The post-check
/// runs even when the apply failed, since a half-finished mutation is
/// exactly what might have removed the channel.
#[derive(Debug)]
pub struct SafetyGuarded {
    inner: Arc<dyn Step>,
    guard: Arc<SafetyGuard>,
}

impl SafetyGuarded {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn Step>, guard: Arc<SafetyGuard>) -> Self {
        Self { inner, guard }
    }

    /// Returns the wrapped step.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn Step> {
        &self.inner
    }
}

/// Wraps `step` with the safety guard.
#[must_use]
pub fn with_safety_guard(step: Arc<dyn Step>, guard: Arc<SafetyGuard>) -> Arc<dyn Step> {
    Arc::new(SafetyGuarded::new(step, guard))
}

#[async_trait]
impl Step for SafetyGuarded {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn description(&self) -> &str {
        self.inner.description()
    }

    fn mutation(&self) -> Mutation {
        self.inner.mutation()
    }

    async fn probe(&self, ctx: &ExecutionContext) -> Result<bool, StepError> {
        self.inner.probe(ctx).await
    }

    async fn apply(&self, ctx: &ExecutionContext) -> Result<(), StepError> {
        self.guard.check(ctx, self.id(), GuardPhase::Pre).await?;

        let applied = self.inner.apply(ctx).await;
        let post = self.guard.check(ctx, self.id(), GuardPhase::Post).await;

        match (applied, post) {
            (Err(e), Err(violation)) => {
                error!(step = self.id(), %violation, "Keep-alive check failed after failed apply");
                Err(e)
            }
            (Err(e), Ok(_)) => Err(e),
            (Ok(()), Err(violation)) => Err(violation.into()),
            (Ok(()), Ok(_)) => Ok(()),
        }
    }

    async fn verify(&self, ctx: &ExecutionContext) -> Result<(), StepError> {
        self.inner.verify(ctx).await
    }
}
