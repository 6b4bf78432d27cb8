//! [`ClusterClient`] binding over the `kubectl` and `helm` command lines.

use super::{
    run_checked, ClusterClient, CommandOutput, CommandRunner, CommandSpec, DesiredState,
    HelmRelease, ReadyState, ResourceRef, Selector, FINGERPRINT_ANNOTATION,
    RELEASE_FINGERPRINT_PREFIX,
};
use crate::errors::CollabError;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Kubeconfig written by the cluster distribution.
pub const DEFAULT_KUBECONFIG: &str = "/etc/rancher/rke2/rke2.yaml";

/// `kubectl` shipped with the cluster distribution.
pub const DEFAULT_KUBECTL: &str = "/var/lib/rancher/rke2/bin/kubectl";

/// Cluster client that shells out to `kubectl` and `helm`.
#[derive(Clone)]
pub struct KubectlClient {
    runner: Arc<dyn CommandRunner>,
    kubeconfig: PathBuf,
    kubectl: String,
    helm: String,
    call_timeout: Duration,
    install_timeout: Duration,
}

impl std::fmt::Debug for KubectlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubectlClient")
            .field("kubeconfig", &self.kubeconfig)
            .field("kubectl", &self.kubectl)
            .field("helm", &self.helm)
            .finish_non_exhaustive()
    }
}

impl KubectlClient {
    /// Creates a client using the distribution's default paths.
    #[must_use]
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            kubeconfig: PathBuf::from(DEFAULT_KUBECONFIG),
            kubectl: DEFAULT_KUBECTL.to_string(),
            helm: "helm".to_string(),
            call_timeout: Duration::from_secs(30),
            install_timeout: Duration::from_secs(600),
        }
    }

    /// Sets the kubeconfig path.
    #[must_use]
    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = path.into();
        self
    }

    /// Sets the `kubectl` and `helm` binaries.
    #[must_use]
    pub fn with_binaries(mut self, kubectl: impl Into<String>, helm: impl Into<String>) -> Self {
        self.kubectl = kubectl.into();
        self.helm = helm.into();
        self
    }

    /// Sets the bound for a chart install or upgrade.
    #[must_use]
    pub const fn with_install_timeout(mut self, timeout: Duration) -> Self {
        self.install_timeout = timeout;
        self
    }

    /// Returns the kubeconfig path.
    #[must_use]
    pub fn kubeconfig(&self) -> &Path {
        &self.kubeconfig
    }

    fn kubectl(&self) -> CommandSpec {
        CommandSpec::new(&self.kubectl)
            .arg("--kubeconfig")
            .arg(self.kubeconfig.display().to_string())
            .timeout(self.call_timeout)
    }

    fn helm(&self) -> CommandSpec {
        CommandSpec::new(&self.helm)
            .env("KUBECONFIG", self.kubeconfig.display().to_string())
            .timeout(self.call_timeout)
    }

    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, CollabError> {
        run_checked(self.runner.as_ref(), &spec).await
    }

    async fn apply_json(&self, body: &Value) -> Result<(), CollabError> {
        self.run(self.kubectl().args(["apply", "-f", "-"]).stdin(body.to_string()))
            .await
            .map(drop)
    }

    async fn upgrade_release(&self, release: &HelmRelease, fingerprint: &str) -> Result<(), CollabError> {
        self.run(
            self.helm()
                .args(["repo", "add", release.repo_name.as_str(), release.repo_url.as_str(), "--force-update"]),
        )
        .await?;

        let chart = format!("{}/{}", release.repo_name, release.chart);
        let description = format!("{RELEASE_FINGERPRINT_PREFIX}{fingerprint}");
        let spec = self
            .helm()
            .args(["upgrade", "--install", release.name.as_str(), chart.as_str()])
            .args(["--namespace", release.namespace.as_str(), "--create-namespace"])
            .args(["--version", release.version.as_str()])
            .args(["--description", description.as_str()])
            .args(["--values", "-"])
            .stdin(release.values.to_string())
            .timeout(self.install_timeout);
        self.run(spec).await.map(drop)
    }

    async fn delete(&self, target: &ResourceRef) -> Result<(), CollabError> {
        if target.is_release() {
            let ns = target.namespace.as_deref().unwrap_or("default");
            let spec = self.helm().args(["uninstall", target.name.as_str(), "--namespace", ns]);
            let output = self.runner.run_command(&spec).await?;
            if output.success() || is_not_found(&output) {
                return Ok(());
            }
            return output.check(&spec).map(drop);
        }

        let mut spec = self
            .kubectl()
            .args(["delete", target.kind.as_str(), target.name.as_str(), "--ignore-not-found", "--wait=false"]);
        if let Some(ns) = &target.namespace {
            spec = spec.args(["--namespace", ns.as_str()]);
        }
        self.run(spec).await.map(drop)
    }

    async fn patch(&self, target: &ResourceRef, patch: &Value) -> Result<(), CollabError> {
        // Namespace finalizers live under spec and only the finalize
        // subresource accepts changes to them.
        if target.kind == "Namespace" && patch.pointer("/spec/finalizers").is_some() {
            let body = json!({
                "apiVersion": "v1",
                "kind": "Namespace",
                "metadata": { "name": target.name },
                "spec": { "finalizers": [] }
            });
            let path = format!("/api/v1/namespaces/{}/finalize", target.name);
            return self
                .run(self.kubectl().args(["replace", "--raw", path.as_str(), "-f", "-"]).stdin(body.to_string()))
                .await
                .map(drop);
        }

        let mut spec = self.kubectl().args(["patch", target.kind.as_str(), target.name.as_str(), "--type=merge", "-p"]);
        spec = spec.arg(patch.to_string());
        if let Some(ns) = &target.namespace {
            spec = spec.args(["--namespace", ns.as_str()]);
        }
        self.run(spec).await.map(drop)
    }

    async fn get_json(&self, spec: CommandSpec) -> Result<Option<Value>, CollabError> {
        let output = self.run(spec).await?;
        let text = output.stdout.trim();
        if text.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(text).map(Some).map_err(|e| CollabError::Malformed {
            source_name: "kubectl".to_string(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl ClusterClient for KubectlClient {
    async fn apply_desired_state(&self, desired: &DesiredState) -> Result<(), CollabError> {
        debug!(target = %desired.target(), "Applying desired state");
        match desired {
            DesiredState::Namespace { name } => {
                self.apply_json(&json!({
                    "apiVersion": "v1",
                    "kind": "Namespace",
                    "metadata": { "name": name }
                }))
                .await
            }
            DesiredState::HelmRelease(release) => {
                self.upgrade_release(release, &desired.fingerprint()).await
            }
            DesiredState::Manifest { .. } => match desired.annotated_body() {
                Some(body) => self.apply_json(&body).await,
                None => Ok(()),
            },
            DesiredState::Absent(target) => self.delete(target).await,
            DesiredState::Patch { target, patch } => self.patch(target, patch).await,
        }
    }

    async fn query_readiness(&self, selector: &Selector) -> Result<ReadyState, CollabError> {
        match selector {
            Selector::Resource(target) => {
                if target.is_release() {
                    let ns = target.namespace.clone().unwrap_or_else(|| "default".to_string());
                    return self
                        .query_readiness(&Selector::Release {
                            namespace: ns,
                            name: target.name.clone(),
                        })
                        .await;
                }
                let mut spec = self
                    .kubectl()
                    .args(["get", target.kind.as_str(), target.name.as_str(), "-o", "json", "--ignore-not-found"]);
                if let Some(ns) = &target.namespace {
                    spec = spec.args(["--namespace", ns.as_str()]);
                }
                Ok(self
                    .get_json(spec)
                    .await?
                    .map_or_else(ReadyState::absent, |v| parse_resource_state(&v)))
            }
            Selector::Pods { namespace, label } => {
                let spec = self
                    .kubectl()
                    .args(["get", "pods", "--namespace", namespace.as_str(), "-l", label.as_str(), "-o", "json"]);
                Ok(self
                    .get_json(spec)
                    .await?
                    .map_or_else(ReadyState::absent, |v| parse_pod_list(&v)))
            }
            Selector::Nodes => {
                let spec = self.kubectl().args(["get", "nodes", "-o", "json"]);
                Ok(self
                    .get_json(spec)
                    .await?
                    .map_or_else(ReadyState::absent, |v| parse_node_list(&v)))
            }
            Selector::Release { namespace, name } => {
                let spec = self
                    .helm()
                    .args(["status", name.as_str(), "--namespace", namespace.as_str(), "-o", "json"]);
                let output = self.runner.run_command(&spec).await?;
                if is_not_found(&output) {
                    return Ok(ReadyState::absent());
                }
                let output = output.check(&spec)?;
                let value: Value =
                    serde_json::from_str(output.stdout.trim()).map_err(|e| CollabError::Malformed {
                        source_name: "helm".to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(parse_release_status(&value))
            }
        }
    }
}

fn is_not_found(output: &CommandOutput) -> bool {
    !output.success() && output.combined().to_lowercase().contains("not found")
}

fn has_true_condition(value: &Value, kind: &str) -> Option<bool> {
    value["status"]["conditions"].as_array().and_then(|conditions| {
        conditions
            .iter()
            .find(|c| c["type"] == kind)
            .map(|c| c["status"] == "True")
    })
}

/// Readiness of one object from its `kubectl get -o json` body.
#[must_use]
pub fn parse_resource_state(value: &Value) -> ReadyState {
    let fingerprint = value["metadata"]["annotations"][FINGERPRINT_ANNOTATION]
        .as_str()
        .map(str::to_string);

    if value["metadata"]["deletionTimestamp"].is_string() {
        return ReadyState::not_ready("terminating");
    }

    let ready = match has_true_condition(value, "Ready") {
        Some(ready) => ready,
        None => match value["status"]["phase"].as_str() {
            Some(phase) => matches!(phase, "Active" | "Bound" | "Running" | "Succeeded"),
            None => value["status"]["created"].as_bool().unwrap_or(true),
        },
    };

    ReadyState {
        present: true,
        ready,
        detail: (!ready).then(|| "conditions not met".to_string()),
        fingerprint,
    }
}

fn pod_ready(pod: &Value) -> bool {
    pod["status"]["phase"] == "Succeeded" || has_true_condition(pod, "Ready") == Some(true)
}

/// Readiness of a pod list: present if any pod matched, ready if every
/// pod is ready or completed.
#[must_use]
pub fn parse_pod_list(value: &Value) -> ReadyState {
    let pods = value["items"].as_array().map(Vec::as_slice).unwrap_or_default();
    if pods.is_empty() {
        return ReadyState::absent();
    }
    let ready = pods.iter().filter(|p| pod_ready(p)).count();
    let detail = format!("{ready}/{} pods ready", pods.len());
    if ready == pods.len() {
        ReadyState::ready(None).with_detail(detail)
    } else {
        ReadyState::not_ready(detail)
    }
}

/// Readiness of the node list: every node must report `Ready`.
#[must_use]
pub fn parse_node_list(value: &Value) -> ReadyState {
    let nodes = value["items"].as_array().map(Vec::as_slice).unwrap_or_default();
    if nodes.is_empty() {
        return ReadyState::absent();
    }
    let ready = nodes
        .iter()
        .filter(|n| has_true_condition(n, "Ready") == Some(true))
        .count();
    let detail = format!("{ready}/{} nodes ready", nodes.len());
    if ready == nodes.len() {
        ReadyState::ready(None).with_detail(detail)
    } else {
        ReadyState::not_ready(detail)
    }
}

/// Readiness of a Helm release from `helm status -o json`.
#[must_use]
pub fn parse_release_status(value: &Value) -> ReadyState {
    let status = value["info"]["status"].as_str().unwrap_or("unknown");
    let fingerprint = value["info"]["description"]
        .as_str()
        .and_then(|d| d.strip_prefix(RELEASE_FINGERPRINT_PREFIX))
        .map(str::to_string);

    if status == "deployed" {
        ReadyState::ready(fingerprint)
    } else {
        ReadyState {
            present: true,
            ready: false,
            detail: Some(format!("release status {status}")),
            fingerprint,
        }
    }
}
