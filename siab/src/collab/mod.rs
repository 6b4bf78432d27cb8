//! Collaborator interfaces and their concrete bindings.
//!
//! The core never talks to the cluster, the host or the packet filter
//! directly. Steps receive these traits through [`Collaborators`], so the
//! property suite can run every step against an in-memory host.

mod command;
mod desired;
mod iptables;
mod kubectl;

pub use command::{run_checked, CommandOutput, CommandSpec, ShellRunner, DEFAULT_COMMAND_TIMEOUT};
pub use desired::{
    DesiredState, HelmRelease, ReadyState, ResourceRef, Selector, FINGERPRINT_ANNOTATION,
    HELM_RELEASE_KIND, RELEASE_FINGERPRINT_PREFIX,
};
pub use iptables::{FilterRule, IptablesFilter, RULE_COMMENT};
pub use kubectl::{
    parse_node_list, parse_pod_list, parse_release_status, parse_resource_state, KubectlClient,
    DEFAULT_KUBECONFIG, DEFAULT_KUBECTL,
};

use crate::errors::CollabError;
use async_trait::async_trait;
use std::sync::Arc;

/// Runs host commands.
///
/// Returns the exit code and output of any command that ran; a non-zero
/// exit is not an error at this level.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `spec` to completion or until its timeout.
    async fn run_command(&self, spec: &CommandSpec) -> Result<CommandOutput, CollabError>;
}

/// Converges and inspects cluster state.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Asks the cluster to converge on `desired`.
    async fn apply_desired_state(&self, desired: &DesiredState) -> Result<(), CollabError>;

    /// Reports the readiness of whatever `selector` names.
    async fn query_readiness(&self, selector: &Selector) -> Result<ReadyState, CollabError>;
}

/// Host packet filter.
#[async_trait]
pub trait PacketFilter: Send + Sync {
    /// Returns true if `rule` is present.
    async fn contains(&self, rule: &FilterRule) -> Result<bool, CollabError>;

    /// Inserts `rule` at the highest-priority position of its chain.
    async fn insert_first(&self, rule: &FilterRule) -> Result<(), CollabError>;

    /// Removes every copy of `rule`.
    async fn remove(&self, rule: &FilterRule) -> Result<(), CollabError>;
}

/// The collaborators a step may call.
#[derive(Clone)]
pub struct Collaborators {
    /// Host commands.
    pub runner: Arc<dyn CommandRunner>,
    /// Cluster API.
    pub cluster: Arc<dyn ClusterClient>,
    /// Packet filter.
    pub filter: Arc<dyn PacketFilter>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    /// Bindings to the real host: `tokio::process`, `kubectl`/`helm` and
    /// `iptables`.
    #[must_use]
    pub fn system(install_timeout: std::time::Duration) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner::new());
        Self {
            cluster: Arc::new(KubectlClient::new(runner.clone()).with_install_timeout(install_timeout)),
            filter: Arc::new(IptablesFilter::new(runner.clone())),
            runner,
        }
    }

    /// Uses one object for all three roles.
    #[must_use]
    pub fn from_host<H>(host: Arc<H>) -> Self
    where
        H: CommandRunner + ClusterClient + PacketFilter + 'static,
    {
        Self {
            runner: host.clone(),
            cluster: host.clone(),
            filter: host,
        }
    }
}
