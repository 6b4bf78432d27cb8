//! What the core asks the cluster collaborator to converge, and what it
//! asks it to report.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::fmt;

/// Annotation carrying the desired-state fingerprint on applied manifests.
pub const FINGERPRINT_ANNOTATION: &str = "siab.io/fingerprint";

/// Prefix of the Helm release description that carries the fingerprint.
pub const RELEASE_FINGERPRINT_PREFIX: &str = "siab-fingerprint=";

/// Kind used in a [`ResourceRef`] that names a Helm release.
pub const HELM_RELEASE_KIND: &str = "HelmRelease";

/// Reference to one cluster object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// Object kind, as understood by `kubectl get`.
    pub kind: String,
    /// Object name.
    pub name: String,
    /// Namespace; `None` for cluster-scoped objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ResourceRef {
    /// A namespaced object.
    #[must_use]
    pub fn namespaced(kind: impl Into<String>, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// A cluster-scoped object.
    #[must_use]
    pub fn cluster(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            namespace: None,
        }
    }

    /// A namespace.
    #[must_use]
    pub fn namespace(name: impl Into<String>) -> Self {
        Self::cluster("Namespace", name)
    }

    /// A Helm release.
    #[must_use]
    pub fn release(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::namespaced(HELM_RELEASE_KIND, namespace, name)
    }

    /// Returns true if this names a Helm release.
    #[must_use]
    pub fn is_release(&self) -> bool {
        self.kind == HELM_RELEASE_KIND
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} in {ns}", self.kind, self.name),
            None => write!(f, "{}/{}", self.kind, self.name),
        }
    }
}

/// A chart installed as a named release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelmRelease {
    /// Release name.
    pub name: String,
    /// Target namespace.
    pub namespace: String,
    /// Local alias of the chart repository.
    pub repo_name: String,
    /// Chart repository URL.
    pub repo_url: String,
    /// Chart name within the repository.
    pub chart: String,
    /// Pinned chart version.
    pub version: String,
    /// Chart values.
    pub values: Value,
}

/// Desired state handed to [`ClusterClient::apply_desired_state`](super::ClusterClient::apply_desired_state).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DesiredState {
    /// A namespace exists.
    Namespace {
        /// Namespace name.
        name: String,
    },
    /// A Helm release is deployed at the given version and values.
    HelmRelease(HelmRelease),
    /// An arbitrary object is applied.
    Manifest {
        /// The object the body describes.
        target: ResourceRef,
        /// Full object body.
        body: Value,
    },
    /// An object is deleted.
    Absent(ResourceRef),
    /// A merge patch is applied to an existing object.
    Patch {
        /// Object to patch.
        target: ResourceRef,
        /// Merge patch body.
        patch: Value,
    },
}

impl DesiredState {
    /// Builds a manifest from a JSON body, deriving the reference from its
    /// `kind` and `metadata`.
    #[must_use]
    pub fn manifest(body: Value) -> Self {
        let kind = body["kind"].as_str().unwrap_or_default().to_string();
        let name = body["metadata"]["name"].as_str().unwrap_or_default().to_string();
        let target = match body["metadata"]["namespace"].as_str() {
            Some(ns) => ResourceRef::namespaced(kind, ns, name),
            None => ResourceRef::cluster(kind, name),
        };
        Self::Manifest { target, body }
    }

    /// A merge patch that clears every finalizer on `target`.
    #[must_use]
    pub fn strip_finalizers(target: ResourceRef) -> Self {
        Self::Patch {
            target,
            patch: json!({ "metadata": { "finalizers": null }, "spec": { "finalizers": [] } }),
        }
    }

    /// Returns the object this state concerns.
    #[must_use]
    pub fn target(&self) -> ResourceRef {
        match self {
            Self::Namespace { name } => ResourceRef::namespace(name.clone()),
            Self::HelmRelease(release) => {
                ResourceRef::release(release.namespace.clone(), release.name.clone())
            }
            Self::Manifest { target, .. } | Self::Patch { target, .. } | Self::Absent(target) => {
                target.clone()
            }
        }
    }

    /// Deterministic SHA-256 fingerprint of the desired state.
    ///
    /// JSON object keys serialize in sorted order, so equal states always
    /// produce equal fingerprints.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    /// Returns the manifest body with the fingerprint annotation set.
    #[must_use]
    pub fn annotated_body(&self) -> Option<Value> {
        let Self::Manifest { body, .. } = self else {
            return None;
        };
        let mut body = body.clone();
        let fingerprint = self.fingerprint();
        if let Some(metadata) = body.get_mut("metadata").and_then(Value::as_object_mut) {
            let annotations = metadata
                .entry("annotations")
                .or_insert_with(|| json!({}));
            if let Some(map) = annotations.as_object_mut() {
                map.insert(FINGERPRINT_ANNOTATION.to_string(), Value::String(fingerprint));
            }
        }
        Some(body)
    }
}

/// What readiness may be asked about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "select", rename_all = "snake_case")]
pub enum Selector {
    /// A single object.
    Resource(ResourceRef),
    /// Every pod matching a label selector in a namespace.
    Pods {
        /// Namespace.
        namespace: String,
        /// Label selector, e.g. `app.kubernetes.io/instance=keycloak`.
        label: String,
    },
    /// Every node of the cluster.
    Nodes,
    /// A Helm release.
    Release {
        /// Namespace.
        namespace: String,
        /// Release name.
        name: String,
    },
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(r) => write!(f, "{r}"),
            Self::Pods { namespace, label } => write!(f, "pods {label} in {namespace}"),
            Self::Nodes => write!(f, "nodes"),
            Self::Release { namespace, name } => write!(f, "release {name} in {namespace}"),
        }
    }
}

/// Readiness reported by the cluster collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyState {
    /// Whether the selected object(s) exist.
    pub present: bool,
    /// Whether they report ready.
    pub ready: bool,
    /// Human-readable detail for logs and step messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Fingerprint recorded on the object by the last apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl ReadyState {
    /// Nothing matched.
    #[must_use]
    pub fn absent() -> Self {
        Self::default()
    }

    /// Present and ready.
    #[must_use]
    pub fn ready(fingerprint: Option<String>) -> Self {
        Self {
            present: true,
            ready: true,
            detail: None,
            fingerprint,
        }
    }

    /// Present but not ready.
    #[must_use]
    pub fn not_ready(detail: impl Into<String>) -> Self {
        Self {
            present: true,
            ready: false,
            detail: Some(detail.into()),
            fingerprint: None,
        }
    }

    /// Sets the detail.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Present, ready and carrying exactly `expected` as fingerprint.
    #[must_use]
    pub fn matches(&self, expected: &str) -> bool {
        self.present && self.ready && self.fingerprint.as_deref() == Some(expected)
    }

    /// Short description of why the state is not satisfied.
    #[must_use]
    pub fn describe(&self) -> String {
        if !self.present {
            return "absent".to_string();
        }
        let base = if self.ready { "ready" } else { "not ready" };
        match &self.detail {
            Some(detail) => format!("{base} ({detail})"),
            None => base.to_string(),
        }
    }
}
