//! The install and uninstall step catalog.
//!
//! [`install_registry`] and [`uninstall_registry`] turn the configuration
//! into ordered, guarded registries. Teardown is the exact reverse of the
//! install order.

mod catalog;
mod component;
mod host;
mod removal;

pub use catalog::{catalog, ComponentSpec, CLUSTER_ISSUER, GATEWAY, GATEWAY_NAMESPACE};
pub use component::ComponentStep;
pub use host::{
    cluster_rules, BootstrapCluster, ConfigureFirewall, PrepareHost, CLUSTER_CONFIG_PATH,
    CLUSTER_INSTALL_URL, CLUSTER_PORTS, CLUSTER_RULE_COMMENT, CLUSTER_SERVICE,
};
pub use removal::{ComponentTeardown, RemoveData, RestoreFirewall, TeardownCluster};

use crate::collab::Collaborators;
use crate::config::SiabConfig;
use crate::core::InstallMode;
use crate::errors::RegistryError;
use crate::pipeline::{GuardPolicy, RegistryBuilder, StepRegistry};
use crate::safety::SafetyGuard;
use std::sync::Arc;

/// Builds the install registry: host preparation, firewall, cluster, then
/// every enabled component.
///
/// Steps that touch the host network are wrapped by `guard`.
///
/// # Errors
///
/// Returns an error if two steps share an id.
pub fn install_registry(
    config: &SiabConfig,
    collab: &Collaborators,
    guard: &Arc<SafetyGuard>,
) -> Result<StepRegistry, RegistryError> {
    let mut builder = RegistryBuilder::new("install", InstallMode::Install)
        .step(PrepareHost)
        .step(ConfigureFirewall::new(collab.clone()))
        .step(BootstrapCluster::new(collab.clone()));

    for spec in catalog(config) {
        let enabled = spec.enabled;
        builder = builder.step_if(enabled, ComponentStep::new(spec, collab.clone()));
    }

    Ok(builder
        .build()?
        .guarded(guard, GuardPolicy::for_mode(InstallMode::Install)))
}

/// Builds the uninstall registry: every component in reverse, then the
/// cluster, the firewall rules and, unless `keep_data`, the data directory.
///
/// Components skipped by a toggle are still torn down, since an earlier
/// install may have deployed them. Every step is wrapped by `guard`.
///
/// # Errors
///
/// Returns an error if two steps share an id.
pub fn uninstall_registry(
    config: &SiabConfig,
    collab: &Collaborators,
    guard: &Arc<SafetyGuard>,
    keep_data: bool,
) -> Result<StepRegistry, RegistryError> {
    let mut builder = RegistryBuilder::new("uninstall", InstallMode::Uninstall);
    for spec in catalog(config).into_iter().rev() {
        builder = builder.step(ComponentTeardown::new(spec, collab.clone()));
    }

    Ok(builder
        .step(TeardownCluster::new(collab.clone()))
        .step(RestoreFirewall::new(collab.clone()))
        .step_if(!keep_data, RemoveData)
        .build()?
        .guarded(guard, GuardPolicy::for_mode(InstallMode::Uninstall)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::safety::{KeepAliveRule, ManagementChannel};
    use crate::testing::FakeHost;
    use pretty_assertions::assert_eq;

    fn fixtures() -> (Collaborators, Arc<SafetyGuard>) {
        let host = Arc::new(FakeHost::new());
        let guard = Arc::new(SafetyGuard::new(
            ManagementChannel::from_port(22),
            KeepAliveRule::for_port(22),
            host.clone(),
        ));
        (Collaborators::from_host(host), guard)
    }

    #[test]
    fn test_install_order_and_toggles() {
        let (collab, guard) = fixtures();
        let mut config = SiabConfig::new();
        config.toggles.skip_monitoring = true;
        config.toggles.skip_policy = true;

        let registry = install_registry(&config, &collab, &guard).unwrap();
        assert_eq!(
            registry.ids(),
            vec![
                "prepare-host",
                "configure-firewall",
                "bootstrap-cluster",
                "cert-manager",
                "metallb",
                "longhorn",
                "istio",
                "keycloak",
                "minio",
                "trivy-operator",
            ]
        );
    }

    #[test]
    fn test_install_guards_only_network_steps() {
        let (collab, guard) = fixtures();
        let registry = install_registry(&SiabConfig::new(), &collab, &guard).unwrap();

        let guarded = |id: &str| format!("{:?}", registry.get(id).unwrap()).contains("SafetyGuarded");
        assert!(guarded("configure-firewall"));
        assert!(guarded("bootstrap-cluster"));
        assert!(guarded("metallb"));
        assert!(!guarded("prepare-host"));
        assert!(!guarded("keycloak"));
    }

    #[test]
    fn test_uninstall_is_reverse_and_fully_guarded() {
        let (collab, guard) = fixtures();
        let mut config = SiabConfig::new();
        config.toggles.skip_storage = true;

        let registry = uninstall_registry(&config, &collab, &guard, false).unwrap();
        let ids = registry.ids();
        assert_eq!(ids.first(), Some(&"remove-monitoring"));
        assert!(ids.contains(&"remove-longhorn"));
        assert_eq!(
            &ids[ids.len() - 4..],
            &["remove-cert-manager", "teardown-cluster", "restore-firewall", "remove-data"]
        );
        assert!(registry
            .steps()
            .iter()
            .all(|s| format!("{s:?}").contains("SafetyGuarded")));
    }

    #[test]
    fn test_keep_data_drops_data_removal() {
        let (collab, guard) = fixtures();
        let registry = uninstall_registry(&SiabConfig::new(), &collab, &guard, true).unwrap();
        assert!(registry.get("remove-data").is_none());
        assert_eq!(registry.ids().last(), Some(&"restore-firewall"));
    }
}
