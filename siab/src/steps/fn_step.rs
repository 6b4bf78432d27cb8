//! Closure-backed steps.

use super::Step;
use crate::context::ExecutionContext;
use crate::core::Mutation;
use crate::errors::StepError;
use async_trait::async_trait;
use std::fmt::Debug;

type ProbeFn = Box<dyn Fn(&ExecutionContext) -> Result<bool, StepError> + Send + Sync>;
type ApplyFn = Box<dyn Fn(&ExecutionContext) -> Result<(), StepError> + Send + Sync>;

/// A step built from synchronous closures.
///
/// Suited to quick local work such as creating directories; anything that
/// talks to a collaborator should implement [`Step`] directly.
pub struct FnStep {
    id: String,
    description: String,
    mutation: Mutation,
    probe: Option<ProbeFn>,
    apply: ApplyFn,
    verify: Option<ApplyFn>,
}

impl FnStep {
    /// Creates a new closure step with no probe.
    pub fn new<F>(id: impl Into<String>, apply: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Result<(), StepError> + Send + Sync + 'static,
    {
        let id = id.into();
        Self {
            description: id.clone(),
            id,
            mutation: Mutation::Local,
            probe: None,
            apply: Box::new(apply),
            verify: None,
        }
    }

    /// Sets the probe.
    #[must_use]
    pub fn with_probe<F>(mut self, probe: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Result<bool, StepError> + Send + Sync + 'static,
    {
        self.probe = Some(Box::new(probe));
        self
    }

    /// Sets the post-condition check.
    #[must_use]
    pub fn with_verify<F>(mut self, verify: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Result<(), StepError> + Send + Sync + 'static,
    {
        self.verify = Some(Box::new(verify));
        self
    }

    /// Sets the mutation class.
    #[must_use]
    pub const fn with_mutation(mut self, mutation: Mutation) -> Self {
        self.mutation = mutation;
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl Debug for FnStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep")
            .field("id", &self.id)
            .field("mutation", &self.mutation)
            .field("has_probe", &self.probe.is_some())
            .finish()
    }
}

#[async_trait]
impl Step for FnStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn mutation(&self) -> Mutation {
        self.mutation
    }

    async fn probe(&self, ctx: &ExecutionContext) -> Result<bool, StepError> {
        match &self.probe {
            Some(probe) => probe(ctx),
            None => Ok(false),
        }
    }

    async fn apply(&self, ctx: &ExecutionContext) -> Result<(), StepError> {
        (self.apply)(ctx)
    }

    async fn verify(&self, ctx: &ExecutionContext) -> Result<(), StepError> {
        match &self.verify {
            Some(verify) => verify(ctx),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SiabConfig;
    use crate::core::InstallMode;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(InstallMode::Install, SiabConfig::default())
    }

    #[tokio::test]
    async fn test_fn_step_without_probe_is_never_satisfied() {
        let step = FnStep::new("mkdir", |_ctx| Ok(()));

        assert_eq!(step.id(), "mkdir");
        assert!(!step.probe(&ctx()).await.unwrap());
        assert!(step.apply(&ctx()).await.is_ok());
        assert!(step.verify(&ctx()).await.is_ok());
    }

    #[tokio::test]
    async fn test_fn_step_hooks() {
        let step = FnStep::new("net", |_ctx| Ok(()))
            .with_probe(|ctx| Ok(ctx.domain() == "siab.local"))
            .with_verify(|_ctx| Err(StepError::verify("route missing")))
            .with_mutation(Mutation::Network)
            .with_description("Configure routes");

        assert_eq!(step.description(), "Configure routes");
        assert_eq!(step.mutation(), Mutation::Network);
        assert!(step.probe(&ctx()).await.unwrap());
        assert!(step.verify(&ctx()).await.is_err());
    }
}
