//! Step status, pipeline mode and mutation class enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a step within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step has not been reached yet.
    #[default]
    Pending,
    /// Step's apply is in flight.
    Running,
    /// Step was applied (and verified) successfully.
    Done,
    /// Step's probe reported the desired state already holds.
    Skipped,
    /// Step's apply, verify or safety check failed.
    Failed,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StepStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Skipped | Self::Failed)
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Done | Self::Skipped)
    }

    /// Returns true if moving from `self` to `next` is allowed within a run.
    ///
    /// Terminal states are never left; a step only enters `Running` from
    /// `Pending`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running | Self::Skipped | Self::Failed)
            | (Self::Running, Self::Done | Self::Failed) => true,
            _ => false,
        }
    }
}

/// Which pipeline is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallMode {
    /// Additive pipeline; halts on the first failure.
    Install,
    /// Destructive pipeline; continues past failures.
    Uninstall,
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Uninstall => write!(f, "uninstall"),
        }
    }
}

impl InstallMode {
    /// Returns true for the destructive pipeline.
    #[must_use]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::Uninstall)
    }
}

/// What kind of host state a step's apply mutates.
///
/// Used to decide which steps the safety guard wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutation {
    /// Purely additive local work (directories, files).
    #[default]
    Local,
    /// Workloads inside the cluster.
    Workload,
    /// Host routes or interfaces.
    Network,
    /// Host packet filter rules.
    Firewall,
    /// Joining or leaving the cluster (starts/stops the node agent).
    ClusterMembership,
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Workload => write!(f, "workload"),
            Self::Network => write!(f, "network"),
            Self::Firewall => write!(f, "firewall"),
            Self::ClusterMembership => write!(f, "cluster_membership"),
        }
    }
}

impl Mutation {
    /// Returns true if the mutation can sever the management channel.
    #[must_use]
    pub const fn touches_host_network(self) -> bool {
        matches!(self, Self::Network | Self::Firewall | Self::ClusterMembership)
    }
}
