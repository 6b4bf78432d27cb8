//! Install step for one catalog component.

use super::ComponentSpec;
use crate::collab::{Collaborators, DesiredState, ReadyState, Selector};
use crate::context::ExecutionContext;
use crate::core::Mutation;
use crate::errors::StepError;
use crate::pipeline::{poll_until, PollConfig};
use crate::steps::Step;
use async_trait::async_trait;
use tracing::{debug, info};

/// Installs a component and its derived resources.
///
/// The probe is satisfied only when the namespace exists, every release is
/// deployed with the expected fingerprint, the pods are ready, and every
/// derived resource is present, ready and fingerprinted. Anything less is
/// repaired by re-applying.
#[derive(Debug)]
pub struct ComponentStep {
    spec: ComponentSpec,
    collab: Collaborators,
}

impl ComponentStep {
    /// Creates the step.
    #[must_use]
    pub const fn new(spec: ComponentSpec, collab: Collaborators) -> Self {
        Self { spec, collab }
    }

    /// Returns the component.
    #[must_use]
    pub const fn spec(&self) -> &ComponentSpec {
        &self.spec
    }

    async fn query(&self, selector: &Selector) -> Result<ReadyState, StepError> {
        Ok(self.collab.cluster.query_readiness(selector).await?)
    }

    /// Returns the first unmet condition, or `None` when fully satisfied.
    async fn assess(&self) -> Result<Option<String>, StepError> {
        let namespace = self.query(&Selector::Resource(self.spec.namespace_ref())).await?;
        if !(namespace.present && namespace.ready) {
            return Ok(Some(format!("namespace {} {}", self.spec.namespace, namespace.describe())));
        }

        for release in &self.spec.releases {
            let desired = DesiredState::HelmRelease(release.clone());
            let state = self
                .query(&Selector::Release {
                    namespace: release.namespace.clone(),
                    name: release.name.clone(),
                })
                .await?;
            if !state.matches(&desired.fingerprint()) {
                return Ok(Some(mismatch(&format!("release {}", release.name), &state)));
            }
        }

        let pods = self.query(&self.spec.pods).await?;
        if !(pods.present && pods.ready) {
            return Ok(Some(format!("pods {}", pods.describe())));
        }

        for derived in &self.spec.derived {
            let target = derived.target();
            let state = self.query(&Selector::Resource(target.clone())).await?;
            if !state.matches(&derived.fingerprint()) {
                return Ok(Some(mismatch(&target.to_string(), &state)));
            }
        }

        Ok(None)
    }

    async fn wait_ready(&self, ctx: &ExecutionContext, selector: &Selector) -> Result<(), StepError> {
        let what = selector.to_string();
        poll_until(
            PollConfig::readiness(&ctx.config().timeouts),
            &what,
            ctx.cancellation(),
            || async move {
                let state = self.query(selector).await?;
                Ok(state.present && state.ready)
            },
        )
        .await
    }
}

fn mismatch(what: &str, state: &ReadyState) -> String {
    if state.present && state.ready {
        format!("{what} has drifted from the expected configuration")
    } else {
        format!("{what} {}", state.describe())
    }
}

#[async_trait]
impl Step for ComponentStep {
    fn id(&self) -> &str {
        self.spec.id
    }

    fn description(&self) -> &str {
        self.spec.description
    }

    fn mutation(&self) -> Mutation {
        self.spec.mutation
    }

    async fn probe(&self, _ctx: &ExecutionContext) -> Result<bool, StepError> {
        let unmet = self.assess().await?;
        if let Some(reason) = &unmet {
            debug!(component = self.spec.id, reason = %reason, "Not satisfied");
        }
        Ok(unmet.is_none())
    }

    async fn apply(&self, ctx: &ExecutionContext) -> Result<(), StepError> {
        let cluster = self.collab.cluster.as_ref();

        cluster
            .apply_desired_state(&DesiredState::Namespace {
                name: self.spec.namespace.to_string(),
            })
            .await?;

        for release in &self.spec.releases {
            info!(component = self.spec.id, release = %release.name, version = %release.version, "Deploying release");
            cluster
                .apply_desired_state(&DesiredState::HelmRelease(release.clone()))
                .await?;
        }

        self.wait_ready(ctx, &self.spec.pods).await?;

        for derived in &self.spec.derived {
            let target = derived.target();
            info!(component = self.spec.id, resource = %target, "Applying derived resource");
            cluster.apply_desired_state(derived).await?;
            self.wait_ready(ctx, &Selector::Resource(target)).await?;
        }

        Ok(())
    }

    async fn verify(&self, _ctx: &ExecutionContext) -> Result<(), StepError> {
        match self.assess().await? {
            None => Ok(()),
            Some(reason) => Err(StepError::verify(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::catalog;
    use crate::core::InstallMode;
    use crate::testing::{test_config, FakeHost};
    use std::sync::Arc;

    fn step(host: &Arc<FakeHost>, id: &str, root: &std::path::Path) -> ComponentStep {
        let spec = catalog(&test_config(root))
            .into_iter()
            .find(|c| c.id == id)
            .unwrap();
        ComponentStep::new(spec, Collaborators::from_host(host.clone()))
    }

    fn ctx(root: &std::path::Path) -> ExecutionContext {
        ExecutionContext::new(InstallMode::Install, test_config(root))
    }

    #[tokio::test]
    async fn test_apply_converges_probe() {
        let root = tempfile::tempdir().unwrap();
        let host = Arc::new(FakeHost::with_cluster());
        let step = step(&host, "metallb", root.path());
        let ctx = ctx(root.path());

        assert!(!step.probe(&ctx).await.unwrap());
        step.apply(&ctx).await.unwrap();
        step.verify(&ctx).await.unwrap();
        assert!(step.probe(&ctx).await.unwrap());

        // namespace, release, pool, advertisement
        assert_eq!(host.applied().len(), 4);
    }

    #[tokio::test]
    async fn test_missing_derived_resource_is_unsatisfied() {
        let root = tempfile::tempdir().unwrap();
        let host = Arc::new(FakeHost::with_cluster());
        let step = step(&host, "metallb", root.path());
        let ctx = ctx(root.path());
        step.apply(&ctx).await.unwrap();

        host.delete_object(&step.spec().derived[0].target());

        assert!(!step.probe(&ctx).await.unwrap());
        let err = step.verify(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("IPAddressPool/siab-pool"));
    }

    #[tokio::test]
    async fn test_drifted_configuration_is_unsatisfied() {
        let root = tempfile::tempdir().unwrap();
        let host = Arc::new(FakeHost::with_cluster());
        let step = step(&host, "cert-manager", root.path());
        let ctx = ctx(root.path());
        step.apply(&ctx).await.unwrap();

        host.tamper(&step.spec().derived[0].target(), "stale");

        let err = step.verify(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("drifted"));
    }

    #[tokio::test]
    async fn test_unready_pods_are_unsatisfied() {
        let root = tempfile::tempdir().unwrap();
        let host = Arc::new(FakeHost::with_cluster());
        let step = step(&host, "keycloak", root.path());
        let ctx = ctx(root.path());
        step.apply(&ctx).await.unwrap();

        host.set_pods_unready("keycloak");

        assert!(!step.probe(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_probe_errors_when_cluster_unreachable() {
        let root = tempfile::tempdir().unwrap();
        let host = Arc::new(FakeHost::new());
        let step = step(&host, "istio", root.path());

        assert!(step.probe(&ctx(root.path())).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_fails_when_pods_never_ready() {
        let root = tempfile::tempdir().unwrap();
        let host = Arc::new(FakeHost::with_cluster());
        host.set_pods_unready("longhorn-system");
        let step = step(&host, "longhorn", root.path());

        let err = step.apply(&ctx(root.path())).await.unwrap_err();
        assert!(matches!(err, StepError::Timeout { .. }));
    }
}
