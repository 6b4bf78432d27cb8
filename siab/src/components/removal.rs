//! Uninstall steps, listed in reverse install order by the registry.

use super::host::{cluster_rules, cluster_service_active, tool_available, CLUSTER_SERVICE};
use super::ComponentSpec;
use crate::collab::{run_checked, Collaborators, CommandSpec, ResourceRef, Selector};
use crate::context::ExecutionContext;
use crate::core::Mutation;
use crate::errors::StepError;
use crate::steps::Step;
use crate::teardown::{remove_with_fallback, RemovalOutcome};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{info, warn};

/// Removes one component: derived resources, then releases, then the
/// namespace.
#[derive(Debug)]
pub struct ComponentTeardown {
    id: String,
    spec: ComponentSpec,
    collab: Collaborators,
}

impl ComponentTeardown {
    /// Creates the step.
    #[must_use]
    pub fn new(spec: ComponentSpec, collab: Collaborators) -> Self {
        Self {
            id: format!("remove-{}", spec.id),
            spec,
            collab,
        }
    }

    fn derived_refs(&self) -> Vec<ResourceRef> {
        self.spec.derived.iter().rev().map(|d| d.target()).collect()
    }

    async fn any_present(&self, targets: &[ResourceRef]) -> Result<bool, StepError> {
        for target in targets {
            if self.collab.cluster.query_readiness(&Selector::Resource(target.clone())).await?.present {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn remaining_targets(&self) -> Vec<ResourceRef> {
        let mut targets = self.derived_refs();
        targets.extend(self.spec.release_refs());
        targets.push(self.spec.namespace_ref());
        targets
    }
}

#[async_trait]
impl Step for ComponentTeardown {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        self.spec.description
    }

    fn mutation(&self) -> Mutation {
        self.spec.mutation
    }

    async fn probe(&self, _ctx: &ExecutionContext) -> Result<bool, StepError> {
        if !cluster_service_active(&self.collab).await? {
            return Ok(true);
        }
        Ok(!self.any_present(&self.remaining_targets()).await?)
    }

    async fn apply(&self, ctx: &ExecutionContext) -> Result<(), StepError> {
        let cluster = self.collab.cluster.as_ref();
        let mut releases = self.spec.release_refs();
        releases.reverse();

        for group in [self.derived_refs(), releases, vec![self.spec.namespace_ref()]] {
            if group.is_empty() {
                continue;
            }
            if let RemovalOutcome::Forced(stripped) = remove_with_fallback(cluster, ctx, &group).await? {
                let names: Vec<String> = stripped.iter().map(ToString::to_string).collect();
                warn!(component = self.spec.id, forced = %names.join(", "), "Finalizers stripped");
            }
        }
        info!(component = self.spec.id, "Component removed");
        Ok(())
    }

    async fn verify(&self, _ctx: &ExecutionContext) -> Result<(), StepError> {
        if self.any_present(&self.remaining_targets()).await? {
            Err(StepError::verify(format!("{} resources still present", self.spec.id)))
        } else {
            Ok(())
        }
    }
}

/// Stops the cluster and runs the distribution's uninstall script.
#[derive(Debug)]
pub struct TeardownCluster {
    collab: Collaborators,
}

impl TeardownCluster {
    /// Creates the step.
    #[must_use]
    pub const fn new(collab: Collaborators) -> Self {
        Self { collab }
    }
}

const UNINSTALL_SCRIPT: &str =
    "PATH=$PATH:/usr/local/bin; if command -v rke2-uninstall.sh >/dev/null; then rke2-uninstall.sh; fi";

#[async_trait]
impl Step for TeardownCluster {
    fn id(&self) -> &str {
        "teardown-cluster"
    }

    fn description(&self) -> &str {
        "Kubernetes cluster removal"
    }

    fn mutation(&self) -> Mutation {
        Mutation::ClusterMembership
    }

    async fn probe(&self, _ctx: &ExecutionContext) -> Result<bool, StepError> {
        Ok(!cluster_service_active(&self.collab).await?
            && !tool_available(&self.collab, "rke2-uninstall.sh").await?)
    }

    async fn apply(&self, ctx: &ExecutionContext) -> Result<(), StepError> {
        let runner = self.collab.runner.as_ref();
        let timeout = ctx.config().timeouts.delete();

        let stop = CommandSpec::new("systemctl")
            .args(["disable", "--now", CLUSTER_SERVICE])
            .timeout(timeout);
        if let Err(e) = run_checked(runner, &stop).await {
            warn!(error = %e, "Stopping cluster service failed, continuing with uninstall script");
        }

        run_checked(runner, &CommandSpec::shell(UNINSTALL_SCRIPT).timeout(timeout)).await?;
        info!("Cluster removed");
        Ok(())
    }

    async fn verify(&self, ctx: &ExecutionContext) -> Result<(), StepError> {
        if self.probe(ctx).await? {
            Ok(())
        } else {
            Err(StepError::verify("cluster service or uninstall script still present"))
        }
    }
}

/// Closes the ports opened for the cluster.
#[derive(Debug)]
pub struct RestoreFirewall {
    collab: Collaborators,
}

impl RestoreFirewall {
    /// Creates the step.
    #[must_use]
    pub const fn new(collab: Collaborators) -> Self {
        Self { collab }
    }
}

#[async_trait]
impl Step for RestoreFirewall {
    fn id(&self) -> &str {
        "restore-firewall"
    }

    fn description(&self) -> &str {
        "Cluster firewall rules removal"
    }

    fn mutation(&self) -> Mutation {
        Mutation::Firewall
    }

    async fn probe(&self, _ctx: &ExecutionContext) -> Result<bool, StepError> {
        for rule in cluster_rules() {
            if self.collab.filter.contains(&rule).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn apply(&self, _ctx: &ExecutionContext) -> Result<(), StepError> {
        for rule in cluster_rules() {
            self.collab.filter.remove(&rule).await?;
        }
        Ok(())
    }

    async fn verify(&self, ctx: &ExecutionContext) -> Result<(), StepError> {
        if self.probe(ctx).await? {
            Ok(())
        } else {
            Err(StepError::verify("cluster ports still open"))
        }
    }
}

/// Deletes the data directory.
#[derive(Debug, Default)]
pub struct RemoveData;

impl RemoveData {
    fn target(ctx: &ExecutionContext) -> PathBuf {
        ctx.config().data_dir.clone()
    }
}

#[async_trait]
impl Step for RemoveData {
    fn id(&self) -> &str {
        "remove-data"
    }

    fn description(&self) -> &str {
        "Persistent data removal"
    }

    async fn probe(&self, ctx: &ExecutionContext) -> Result<bool, StepError> {
        let dir = Self::target(ctx);
        tokio::fs::try_exists(&dir)
            .await
            .map(|exists| !exists)
            .map_err(|e| StepError::probe(format!("checking {}: {e}", dir.display())))
    }

    async fn apply(&self, ctx: &ExecutionContext) -> Result<(), StepError> {
        let dir = Self::target(ctx);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(dir = %dir.display(), "Data removed");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StepError::apply(format!("removing {}: {e}", dir.display()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{ClusterClient, DesiredState, PacketFilter};
    use crate::components::catalog;
    use crate::core::InstallMode;
    use crate::testing::{test_context, FakeHost};
    use std::sync::Arc;

    fn istio(ctx: &ExecutionContext) -> ComponentSpec {
        catalog(ctx.config())
            .into_iter()
            .find(|c| c.id == "istio")
            .unwrap()
    }

    async fn install(host: &FakeHost, spec: &ComponentSpec) {
        host.apply_desired_state(&DesiredState::Namespace {
            name: spec.namespace.to_string(),
        })
        .await
        .unwrap();
        for release in &spec.releases {
            host.apply_desired_state(&DesiredState::HelmRelease(release.clone()))
                .await
                .unwrap();
        }
        for derived in &spec.derived {
            host.apply_desired_state(derived).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_component_teardown_removes_everything() {
        let root = tempfile::tempdir().unwrap();
        let ctx = test_context(InstallMode::Uninstall, root.path());
        let host = Arc::new(FakeHost::with_cluster());
        let spec = istio(&ctx);
        install(&host, &spec).await;
        let step = ComponentTeardown::new(spec.clone(), Collaborators::from_host(host.clone()));

        assert_eq!(step.id(), "remove-istio");
        assert!(!step.probe(&ctx).await.unwrap());
        step.apply(&ctx).await.unwrap();
        step.verify(&ctx).await.unwrap();

        assert!(step.probe(&ctx).await.unwrap());
        assert!(!host.has_object(&spec.namespace_ref()));
        for derived in &spec.derived {
            assert!(!host.has_object(&derived.target()));
        }
    }

    #[tokio::test]
    async fn test_component_teardown_waits_for_cluster_scoped_leftovers() {
        let root = tempfile::tempdir().unwrap();
        let ctx = test_context(InstallMode::Uninstall, root.path());
        let host = Arc::new(FakeHost::with_cluster());
        let spec = catalog(ctx.config())
            .into_iter()
            .find(|c| c.id == "cert-manager")
            .unwrap();
        install(&host, &spec).await;
        for release in spec.release_refs() {
            host.delete_object(&release);
        }
        host.delete_object(&spec.namespace_ref());
        let step = ComponentTeardown::new(spec.clone(), Collaborators::from_host(host.clone()));

        assert!(!step.probe(&ctx).await.unwrap());
        step.apply(&ctx).await.unwrap();
        step.verify(&ctx).await.unwrap();

        assert!(step.probe(&ctx).await.unwrap());
        assert!(!host.has_object(&spec.derived[0].target()));
    }

    #[tokio::test]
    async fn test_component_teardown_satisfied_without_cluster() {
        let root = tempfile::tempdir().unwrap();
        let ctx = test_context(InstallMode::Uninstall, root.path());
        let host = Arc::new(FakeHost::new());
        let step = ComponentTeardown::new(istio(&ctx), Collaborators::from_host(host));

        assert!(step.probe(&ctx).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_component_teardown_forces_stuck_namespace() {
        let root = tempfile::tempdir().unwrap();
        let ctx = test_context(InstallMode::Uninstall, root.path());
        let host = Arc::new(FakeHost::with_cluster());
        let spec = istio(&ctx);
        install(&host, &spec).await;
        host.make_stuck(spec.namespace_ref());
        let step = ComponentTeardown::new(spec.clone(), Collaborators::from_host(host.clone()));

        step.apply(&ctx).await.unwrap();

        assert!(!host.has_object(&spec.namespace_ref()));
        assert!(host
            .applied()
            .iter()
            .any(|s| matches!(s, DesiredState::Patch { target, .. } if *target == spec.namespace_ref())));
    }

    #[tokio::test]
    async fn test_teardown_cluster_wipes_distribution() {
        let root = tempfile::tempdir().unwrap();
        let ctx = test_context(InstallMode::Uninstall, root.path());
        let host = Arc::new(FakeHost::with_cluster());
        let step = TeardownCluster::new(Collaborators::from_host(host.clone()));

        assert!(!step.probe(&ctx).await.unwrap());
        step.apply(&ctx).await.unwrap();
        step.verify(&ctx).await.unwrap();
        assert!(!host.cluster_running());
    }

    #[tokio::test]
    async fn test_restore_firewall_removes_cluster_rules() {
        let root = tempfile::tempdir().unwrap();
        let ctx = test_context(InstallMode::Uninstall, root.path());
        let host = Arc::new(FakeHost::new());
        for rule in cluster_rules() {
            host.seed_rule(rule);
        }
        let step = RestoreFirewall::new(Collaborators::from_host(host.clone()));

        assert!(!step.probe(&ctx).await.unwrap());
        step.apply(&ctx).await.unwrap();
        step.verify(&ctx).await.unwrap();
        for rule in cluster_rules() {
            assert!(!host.contains(&rule).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_remove_data_tolerates_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        let ctx = test_context(InstallMode::Uninstall, root.path());
        std::fs::create_dir_all(ctx.config().data_dir.join("volumes")).unwrap();

        assert!(!RemoveData.probe(&ctx).await.unwrap());
        RemoveData.apply(&ctx).await.unwrap();
        assert!(RemoveData.probe(&ctx).await.unwrap());
        RemoveData.apply(&ctx).await.unwrap();
    }
}
