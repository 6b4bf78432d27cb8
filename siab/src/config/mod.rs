//! Run configuration.
//!
//! Values are layered: built-in defaults, then an optional `KEY=VALUE` file,
//! then `SIAB_*` process environment variables. The CLI applies its flags on
//! top of the result.

mod loader;

pub use loader::{apply_pairs, ConfigLoader, DEFAULT_CONFIG_FILE, ENV_PREFIX};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Host sizing parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sizing {
    /// Minimum logical CPUs.
    #[serde(default = "default_min_cpus")]
    pub min_cpus: u32,
    /// Minimum memory in GiB.
    #[serde(default = "default_min_memory_gb")]
    pub min_memory_gb: u32,
    /// Minimum free disk in GiB on the data filesystem.
    #[serde(default = "default_min_disk_gb")]
    pub min_disk_gb: u32,
    /// Storage replica count.
    #[serde(default = "default_longhorn_replicas")]
    pub longhorn_replicas: u32,
    /// Address range handed to the load balancer.
    #[serde(default = "default_metallb_range")]
    pub metallb_range: String,
}

fn default_min_cpus() -> u32 {
    8
}

fn default_min_memory_gb() -> u32 {
    16
}

fn default_min_disk_gb() -> u32 {
    100
}

fn default_longhorn_replicas() -> u32 {
    3
}

fn default_metallb_range() -> String {
    "10.10.30.240-10.10.30.250".to_string()
}

impl Default for Sizing {
    fn default() -> Self {
        Self {
            min_cpus: default_min_cpus(),
            min_memory_gb: default_min_memory_gb(),
            min_disk_gb: default_min_disk_gb(),
            longhorn_replicas: default_longhorn_replicas(),
            metallb_range: default_metallb_range(),
        }
    }
}

/// Optional components that can be left out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ComponentToggles {
    /// Skip the monitoring stack.
    #[serde(default)]
    pub skip_monitoring: bool,
    /// Skip block storage.
    #[serde(default)]
    pub skip_storage: bool,
    /// Skip object storage.
    #[serde(default)]
    pub skip_object_storage: bool,
    /// Skip the vulnerability scanner.
    #[serde(default)]
    pub skip_security_scanning: bool,
    /// Skip the policy engine.
    #[serde(default)]
    pub skip_policy: bool,
}

/// Bounds on collaborator calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeouts {
    /// Bound on a single probe call.
    #[serde(default = "default_probe_secs")]
    pub probe_secs: u64,
    /// Bound on waiting for a component to become ready.
    #[serde(default = "default_ready_secs")]
    pub ready_secs: u64,
    /// Bound on waiting for ordinary deletion before forcing.
    #[serde(default = "default_delete_secs")]
    pub delete_secs: u64,
    /// Interval between readiness polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_probe_secs() -> u64 {
    8
}

fn default_ready_secs() -> u64 {
    600
}

fn default_delete_secs() -> u64 {
    180
}

fn default_poll_interval_secs() -> u64 {
    5
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe_secs: default_probe_secs(),
            ready_secs: default_ready_secs(),
            delete_secs: default_delete_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl Timeouts {
    /// Probe bound as a duration.
    #[must_use]
    pub const fn probe(&self) -> Duration {
        Duration::from_secs(self.probe_secs)
    }

    /// Readiness bound as a duration.
    #[must_use]
    pub const fn ready(&self) -> Duration {
        Duration::from_secs(self.ready_secs)
    }

    /// Deletion bound as a duration.
    #[must_use]
    pub const fn delete(&self) -> Duration {
        Duration::from_secs(self.delete_secs)
    }

    /// Poll interval as a duration.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Complete configuration for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiabConfig {
    /// Base domain the platform is served under.
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Host sizing.
    #[serde(default)]
    pub sizing: Sizing,
    /// Component skip toggles.
    #[serde(default)]
    pub toggles: ComponentToggles,
    /// Single-node mode.
    #[serde(default)]
    pub single_node: bool,
    /// Port of the operator's management session.
    #[serde(default = "default_management_port")]
    pub management_port: u16,
    /// Where status artifacts, logs, credentials and backups live.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Root of the cluster's data directories.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Collaborator call bounds.
    #[serde(default)]
    pub timeouts: Timeouts,
    /// Unrecognised `SIAB_*` keys, kept verbatim.
    #[serde(default)]
    pub env_overrides: BTreeMap<String, String>,
}

fn default_domain() -> String {
    "siab.local".to_string()
}

fn default_management_port() -> u16 {
    22
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/siab")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/rancher")
}

impl Default for SiabConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            sizing: Sizing::default(),
            toggles: ComponentToggles::default(),
            single_node: false,
            management_port: default_management_port(),
            state_dir: default_state_dir(),
            data_dir: default_data_dir(),
            timeouts: Timeouts::default(),
            env_overrides: BTreeMap::new(),
        }
    }
}

impl SiabConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the domain.
    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Sets the state directory.
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    /// Enables single-node mode.
    ///
    /// Lowers the preflight minimums and forces one storage replica.
    #[must_use]
    pub fn single_node(mut self) -> Self {
        self.apply_single_node();
        self
    }

    pub(crate) fn apply_single_node(&mut self) {
        self.single_node = true;
        self.sizing.longhorn_replicas = 1;
        self.sizing.min_cpus = self.sizing.min_cpus.min(4);
        self.sizing.min_memory_gb = self.sizing.min_memory_gb.min(8);
        self.sizing.min_disk_gb = self.sizing.min_disk_gb.min(50);
    }

    /// Directory for generated credentials.
    #[must_use]
    pub fn credentials_dir(&self) -> PathBuf {
        self.state_dir.join("credentials")
    }

    /// Directory for snapshots.
    #[must_use]
    pub fn backups_dir(&self) -> PathBuf {
        self.state_dir.join("backups")
    }

    /// Host name for a platform service, e.g. `auth.<domain>`.
    #[must_use]
    pub fn service_host(&self, service: &str) -> String {
        format!("{service}.{}", self.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SiabConfig::default();
        assert_eq!(config.domain, "siab.local");
        assert_eq!(config.management_port, 22);
        assert_eq!(config.sizing.longhorn_replicas, 3);
        assert!(!config.single_node);
    }

    #[test]
    fn test_single_node_lowers_requirements() {
        let config = SiabConfig::new().single_node();
        assert!(config.single_node);
        assert_eq!(config.sizing.longhorn_replicas, 1);
        assert_eq!(config.sizing.min_cpus, 4);
        assert_eq!(config.sizing.min_memory_gb, 8);
    }

    #[test]
    fn test_service_host() {
        let config = SiabConfig::new().with_domain("example.org");
        assert_eq!(config.service_host("auth"), "auth.example.org");
    }

    #[test]
    fn test_deserialize_partial() {
        let config: SiabConfig = serde_json::from_str(r#"{"domain": "lab.test"}"#).unwrap();
        assert_eq!(config.domain, "lab.test");
        assert_eq!(config.timeouts.probe_secs, 8);
    }
}
