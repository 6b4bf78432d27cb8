//! The infrastructure component catalog.
//!
//! Entries are listed in install order. Each one names its chart releases,
//! the pods that must be ready, and the derived resources whose presence
//! and shape decide whether the component is fully configured.

use crate::collab::{DesiredState, HelmRelease, ResourceRef, Selector};
use crate::config::SiabConfig;
use crate::core::Mutation;
use serde_json::{json, Value};

/// Name of the cluster-wide certificate issuer.
pub const CLUSTER_ISSUER: &str = "siab-ca-issuer";

/// Name of the ingress gateway.
pub const GATEWAY: &str = "siab-gateway";

/// Namespace of the ingress gateway and its certificates.
pub const GATEWAY_NAMESPACE: &str = "istio-system";

/// One infrastructure component.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSpec {
    /// Step id.
    pub id: &'static str,
    /// Summary table description.
    pub description: &'static str,
    /// Namespace the component lives in.
    pub namespace: &'static str,
    /// Chart releases, installed in order.
    pub releases: Vec<HelmRelease>,
    /// Pods that must be ready.
    pub pods: Selector,
    /// Resources created once the releases are ready.
    pub derived: Vec<DesiredState>,
    /// What installing the component mutates.
    pub mutation: Mutation,
    /// False when a toggle skips the component.
    pub enabled: bool,
}

impl ComponentSpec {
    fn new(id: &'static str, description: &'static str, namespace: &'static str, label: &str) -> Self {
        Self {
            id,
            description,
            namespace,
            releases: Vec::new(),
            pods: Selector::Pods {
                namespace: namespace.to_string(),
                label: label.to_string(),
            },
            derived: Vec::new(),
            mutation: Mutation::Workload,
            enabled: true,
        }
    }

    fn release(mut self, repo: (&str, &str), chart: &str, name: &str, version: &str, values: Value) -> Self {
        self.releases.push(HelmRelease {
            name: name.to_string(),
            namespace: self.namespace.to_string(),
            repo_name: repo.0.to_string(),
            repo_url: repo.1.to_string(),
            chart: chart.to_string(),
            version: version.to_string(),
            values,
        });
        self
    }

    fn derive(mut self, body: Value) -> Self {
        self.derived.push(DesiredState::manifest(body));
        self
    }

    const fn mutating(mut self, mutation: Mutation) -> Self {
        self.mutation = mutation;
        self
    }

    const fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// References to every release.
    #[must_use]
    pub fn release_refs(&self) -> Vec<ResourceRef> {
        self.releases
            .iter()
            .map(|r| ResourceRef::release(r.namespace.clone(), r.name.clone()))
            .collect()
    }

    /// Reference to the namespace.
    #[must_use]
    pub fn namespace_ref(&self) -> ResourceRef {
        ResourceRef::namespace(self.namespace)
    }
}

fn certificate(name: &str, host: &str) -> Value {
    json!({
        "apiVersion": "cert-manager.io/v1",
        "kind": "Certificate",
        "metadata": { "name": name, "namespace": GATEWAY_NAMESPACE },
        "spec": {
            "secretName": format!("{name}-tls"),
            "dnsNames": [host],
            "issuerRef": { "name": CLUSTER_ISSUER, "kind": "ClusterIssuer" }
        }
    })
}

const JETSTACK: (&str, &str) = ("jetstack", "https://charts.jetstack.io");
const METALLB: (&str, &str) = ("metallb", "https://metallb.github.io/metallb");
const LONGHORN: (&str, &str) = ("longhorn", "https://charts.longhorn.io");
const ISTIO: (&str, &str) = ("istio", "https://istio-release.storage.googleapis.com/charts");
const BITNAMI: (&str, &str) = ("bitnami", "https://charts.bitnami.com/bitnami");
const MINIO: (&str, &str) = ("minio", "https://charts.min.io/");
const GATEKEEPER: (&str, &str) = ("gatekeeper", "https://open-policy-agent.github.io/gatekeeper/charts");
const AQUA: (&str, &str) = ("aqua", "https://aquasecurity.github.io/helm-charts/");
const PROMETHEUS: (&str, &str) = ("prometheus-community", "https://prometheus-community.github.io/helm-charts");

const NON_ROOT_REGO: &str = r#"package k8srequirenonroot

violation[{"msg": msg}] {
  c := input.review.object.spec.containers[_]
  not c.securityContext.runAsNonRoot
  msg := sprintf("container %v must set runAsNonRoot", [c.name])
}
"#;

/// Every component in install order, with toggles applied to `enabled`.
#[must_use]
pub fn catalog(config: &SiabConfig) -> Vec<ComponentSpec> {
    let toggles = config.toggles;
    let replicas = config.sizing.longhorn_replicas;

    vec![
        ComponentSpec::new("cert-manager", "Certificate authority", "cert-manager", "app.kubernetes.io/instance=cert-manager")
            .release(JETSTACK, "cert-manager", "cert-manager", "v1.15.3", json!({ "crds": { "enabled": true } }))
            .derive(json!({
                "apiVersion": "cert-manager.io/v1",
                "kind": "ClusterIssuer",
                "metadata": { "name": CLUSTER_ISSUER },
                "spec": { "selfSigned": {} }
            })),
        ComponentSpec::new("metallb", "Load balancer networking", "metallb-system", "app.kubernetes.io/instance=metallb")
            .release(METALLB, "metallb", "metallb", "0.14.8", json!({}))
            .derive(json!({
                "apiVersion": "metallb.io/v1beta1",
                "kind": "IPAddressPool",
                "metadata": { "name": "siab-pool", "namespace": "metallb-system" },
                "spec": { "addresses": [config.sizing.metallb_range] }
            }))
            .derive(json!({
                "apiVersion": "metallb.io/v1beta1",
                "kind": "L2Advertisement",
                "metadata": { "name": "siab-l2", "namespace": "metallb-system" },
                "spec": { "ipAddressPools": ["siab-pool"] }
            }))
            .mutating(Mutation::Network),
        ComponentSpec::new("longhorn", "Block storage", "longhorn-system", "app.kubernetes.io/instance=longhorn")
            .release(LONGHORN, "longhorn", "longhorn", "1.7.1", json!({
                "defaultSettings": { "defaultReplicaCount": replicas },
                "persistence": { "defaultClassReplicaCount": replicas }
            }))
            .enabled(!toggles.skip_storage),
        ComponentSpec::new("istio", "Service mesh and ingress", GATEWAY_NAMESPACE, "app in (istiod,istio-ingressgateway)")
            .release(ISTIO, "base", "istio-base", "1.23.2", json!({}))
            .release(ISTIO, "istiod", "istiod", "1.23.2", json!({}))
            .release(ISTIO, "gateway", "istio-ingressgateway", "1.23.2", json!({
                "labels": { "app": "istio-ingressgateway", "istio": "ingressgateway" },
                "service": { "type": "LoadBalancer" }
            }))
            .derive(certificate("siab-wildcard", &format!("*.{}", config.domain)))
            .derive(json!({
                "apiVersion": "networking.istio.io/v1beta1",
                "kind": "Gateway",
                "metadata": { "name": GATEWAY, "namespace": GATEWAY_NAMESPACE },
                "spec": {
                    "selector": { "istio": "ingressgateway" },
                    "servers": [
                        {
                            "port": { "number": 443, "name": "https", "protocol": "HTTPS" },
                            "hosts": [format!("*.{}", config.domain)],
                            "tls": { "mode": "SIMPLE", "credentialName": "siab-wildcard-tls" }
                        },
                        {
                            "port": { "number": 80, "name": "http", "protocol": "HTTP" },
                            "hosts": [format!("*.{}", config.domain)],
                            "tls": { "httpsRedirect": true }
                        }
                    ]
                }
            }))
            .mutating(Mutation::Network),
        ComponentSpec::new("keycloak", "Identity provider", "keycloak", "app.kubernetes.io/instance=keycloak")
            .release(BITNAMI, "keycloak", "keycloak", "22.2.1", json!({
                "proxy": "edge",
                "production": false,
                "httpRelativePath": "/"
            }))
            .derive(certificate("keycloak", &config.service_host("auth"))),
        ComponentSpec::new("minio", "Object storage", "minio", "app=minio")
            .release(MINIO, "minio", "minio", "5.2.0", json!({
                "mode": "standalone",
                "replicas": 1,
                "persistence": { "size": "50Gi" },
                "resources": { "requests": { "memory": "1Gi" } }
            }))
            .derive(certificate("minio", &config.service_host("minio")))
            .enabled(!toggles.skip_object_storage),
        ComponentSpec::new("gatekeeper", "Policy engine", "gatekeeper-system", "gatekeeper.sh/system=yes")
            .release(GATEKEEPER, "gatekeeper", "gatekeeper", "3.17.1", json!({}))
            .derive(json!({
                "apiVersion": "templates.gatekeeper.sh/v1",
                "kind": "ConstraintTemplate",
                "metadata": { "name": "k8srequirenonroot" },
                "spec": {
                    "crd": { "spec": { "names": { "kind": "K8sRequireNonRoot" } } },
                    "targets": [ { "target": "admission.k8s.gatekeeper.sh", "rego": NON_ROOT_REGO } ]
                }
            }))
            .enabled(!toggles.skip_policy),
        ComponentSpec::new("trivy-operator", "Vulnerability scanner", "trivy-system", "app.kubernetes.io/name=trivy-operator")
            .release(AQUA, "trivy-operator", "trivy-operator", "0.24.1", json!({
                "trivy": { "ignoreUnfixed": true }
            }))
            .enabled(!toggles.skip_security_scanning),
        ComponentSpec::new("monitoring", "Metrics and dashboards", "monitoring", "release=monitoring")
            .release(PROMETHEUS, "kube-prometheus-stack", "monitoring", "62.7.0", json!({
                "prometheus": { "prometheusSpec": { "retention": "15d" } },
                "grafana": { "enabled": true }
            }))
            .derive(certificate("grafana", &config.service_host("grafana")))
            .enabled(!toggles.skip_monitoring),
    ]
}
