//! Host-level install steps: directories, firewall and cluster bootstrap.

use crate::collab::{run_checked, Collaborators, CommandSpec, FilterRule, ReadyState, Selector};
use crate::context::ExecutionContext;
use crate::core::Mutation;
use crate::errors::StepError;
use crate::pipeline::{poll_until, PollConfig};
use crate::steps::Step;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Service unit of the cluster distribution.
pub const CLUSTER_SERVICE: &str = "rke2-server";

/// Distribution configuration file.
pub const CLUSTER_CONFIG_PATH: &str = "/etc/rancher/rke2/config.yaml";

/// Distribution install script.
pub const CLUSTER_INSTALL_URL: &str = "https://get.rke2.io";

/// Ports the cluster needs open: API server, supervisor, kubelet and
/// ingress.
pub const CLUSTER_PORTS: [u16; 5] = [6443, 9345, 10250, 80, 443];

/// Comment tag on cluster port rules.
pub const CLUSTER_RULE_COMMENT: &str = "siab-cluster";

/// The packet-filter rules opened for the cluster.
#[must_use]
pub fn cluster_rules() -> Vec<FilterRule> {
    CLUSTER_PORTS
        .iter()
        .map(|port| FilterRule::accept_tcp(*port, CLUSTER_RULE_COMMENT))
        .collect()
}

/// Returns true if the cluster service reports active.
pub(crate) async fn cluster_service_active(collab: &Collaborators) -> Result<bool, StepError> {
    let spec = CommandSpec::new("systemctl")
        .args(["is-active", "--quiet", CLUSTER_SERVICE])
        .timeout(Duration::from_secs(5));
    Ok(collab.runner.run_command(&spec).await?.success())
}

/// Returns true if `tool` resolves on the host's `PATH`.
pub(crate) async fn tool_available(collab: &Collaborators, tool: &str) -> Result<bool, StepError> {
    let spec = CommandSpec::shell(format!("command -v {tool}")).timeout(Duration::from_secs(5));
    Ok(collab.runner.run_command(&spec).await?.success())
}

/// Creates the state, credentials and backup directories.
///
/// Has no probe: creating an existing directory is a no-op.
#[derive(Debug, Default)]
pub struct PrepareHost;

#[async_trait]
impl Step for PrepareHost {
    fn id(&self) -> &str {
        "prepare-host"
    }

    fn description(&self) -> &str {
        "State and credential directories"
    }

    async fn apply(&self, ctx: &ExecutionContext) -> Result<(), StepError> {
        let config = ctx.config();
        for dir in [config.state_dir.clone(), config.credentials_dir(), config.backups_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| StepError::apply(format!("creating {}: {e}", dir.display())))?;
            debug!(dir = %dir.display(), "Directory ready");
        }
        Ok(())
    }
}

/// Opens the cluster ports.
#[derive(Debug)]
pub struct ConfigureFirewall {
    collab: Collaborators,
}

impl ConfigureFirewall {
    /// Creates the step.
    #[must_use]
    pub const fn new(collab: Collaborators) -> Self {
        Self { collab }
    }

    async fn missing(&self) -> Result<Vec<FilterRule>, StepError> {
        let mut missing = Vec::new();
        for rule in cluster_rules() {
            if !self.collab.filter.contains(&rule).await? {
                missing.push(rule);
            }
        }
        Ok(missing)
    }
}

#[async_trait]
impl Step for ConfigureFirewall {
    fn id(&self) -> &str {
        "configure-firewall"
    }

    fn description(&self) -> &str {
        "Cluster firewall rules"
    }

    fn mutation(&self) -> Mutation {
        Mutation::Firewall
    }

    async fn probe(&self, _ctx: &ExecutionContext) -> Result<bool, StepError> {
        Ok(self.missing().await?.is_empty())
    }

    async fn apply(&self, _ctx: &ExecutionContext) -> Result<(), StepError> {
        for rule in self.missing().await? {
            info!(rule = %rule, "Opening port");
            self.collab.filter.insert_first(&rule).await?;
        }
        Ok(())
    }

    async fn verify(&self, _ctx: &ExecutionContext) -> Result<(), StepError> {
        let missing = self.missing().await?;
        if missing.is_empty() {
            Ok(())
        } else {
            let ports: Vec<String> = missing
                .iter()
                .filter_map(FilterRule::port)
                .map(|p| p.to_string())
                .collect();
            Err(StepError::verify(format!("ports still closed: {}", ports.join(", "))))
        }
    }
}

/// Installs and starts the cluster distribution.
#[derive(Debug)]
pub struct BootstrapCluster {
    collab: Collaborators,
}

impl BootstrapCluster {
    /// Creates the step.
    #[must_use]
    pub const fn new(collab: Collaborators) -> Self {
        Self { collab }
    }

    /// Distribution configuration for `domain`.
    #[must_use]
    pub fn cluster_config(domain: &str) -> String {
        format!("write-kubeconfig-mode: \"0600\"\ntls-san:\n  - {domain}\n")
    }

    /// Configuration currently on the host, `None` if there is none.
    async fn current_config(&self) -> Result<Option<String>, StepError> {
        let read = CommandSpec::new("cat")
            .arg(CLUSTER_CONFIG_PATH)
            .timeout(Duration::from_secs(5));
        let output = self.collab.runner.run_command(&read).await?;
        Ok(output.success().then_some(output.stdout))
    }

    async fn nodes(&self) -> Result<ReadyState, StepError> {
        Ok(self.collab.cluster.query_readiness(&Selector::Nodes).await?)
    }
}

#[async_trait]
impl Step for BootstrapCluster {
    fn id(&self) -> &str {
        "bootstrap-cluster"
    }

    fn description(&self) -> &str {
        "Kubernetes cluster"
    }

    fn mutation(&self) -> Mutation {
        Mutation::ClusterMembership
    }

    async fn probe(&self, ctx: &ExecutionContext) -> Result<bool, StepError> {
        if !cluster_service_active(&self.collab).await? {
            return Ok(false);
        }
        let expected = Self::cluster_config(ctx.domain());
        if self.current_config().await?.as_deref() != Some(expected.as_str()) {
            debug!(path = CLUSTER_CONFIG_PATH, "Cluster configuration differs");
            return Ok(false);
        }
        let nodes = self.nodes().await?;
        debug!(nodes = %nodes.describe(), "Cluster nodes");
        Ok(nodes.present && nodes.ready)
    }

    async fn apply(&self, ctx: &ExecutionContext) -> Result<(), StepError> {
        let timeouts = &ctx.config().timeouts;
        let runner = self.collab.runner.as_ref();

        let config = Self::cluster_config(ctx.domain());
        let changed = self.current_config().await?.as_deref() != Some(config.as_str());
        if changed {
            let write_config = CommandSpec::new("install")
                .args(["-D", "-m", "0600", "/dev/stdin", CLUSTER_CONFIG_PATH])
                .stdin(config);
            run_checked(runner, &write_config).await?;
        }

        if !tool_available(&self.collab, "rke2").await? {
            info!("Installing cluster distribution");
            let install = CommandSpec::shell(format!("curl -sfL {CLUSTER_INSTALL_URL} | sh -"))
                .env("INSTALL_RKE2_CHANNEL", "stable")
                .timeout(timeouts.ready());
            run_checked(runner, &install).await?;
        }

        // A running server only rereads its configuration on restart.
        if changed && cluster_service_active(&self.collab).await? {
            info!(domain = ctx.domain(), "Restarting cluster with new configuration");
            let restart = CommandSpec::new("systemctl")
                .args(["restart", CLUSTER_SERVICE])
                .timeout(timeouts.ready());
            run_checked(runner, &restart).await?;
        }

        let start = CommandSpec::new("systemctl")
            .args(["enable", "--now", CLUSTER_SERVICE])
            .timeout(timeouts.ready());
        run_checked(runner, &start).await?;

        poll_until(PollConfig::readiness(timeouts), "cluster nodes ready", ctx.cancellation(), || async move {
            let nodes = self.nodes().await?;
            Ok(nodes.present && nodes.ready)
        })
        .await
    }

    async fn verify(&self, ctx: &ExecutionContext) -> Result<(), StepError> {
        if self.probe(ctx).await? {
            Ok(())
        } else {
            Err(StepError::verify("cluster service or nodes not ready"))
        }
    }
}
