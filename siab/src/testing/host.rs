//! In-memory host used by the property suite.

use crate::collab::{
    ClusterClient, CommandOutput, CommandRunner, CommandSpec, DesiredState, FilterRule,
    PacketFilter, ReadyState, ResourceRef, Selector,
};
use crate::errors::CollabError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

/// Service name of the cluster distribution.
const CLUSTER_SERVICE: &str = "rke2-server";

#[derive(Debug, Clone)]
struct FakeObject {
    fingerprint: Option<String>,
    terminating: bool,
}

#[derive(Debug)]
struct HostState {
    rules: Vec<FilterRule>,
    filter_error: Option<String>,
    objects: HashMap<ResourceRef, FakeObject>,
    stuck: HashSet<ResourceRef>,
    unready_pods: HashSet<String>,
    nodes_ready: bool,
    services: HashSet<String>,
    tools: HashSet<String>,
    files: HashMap<String, String>,
    failures: Vec<(String, usize)>,
    commands: Vec<CommandSpec>,
    applied: Vec<DesiredState>,
    cpus: u32,
    memory_gb: u32,
    disk_gb: u32,
    mounts: Vec<String>,
    processes: Vec<String>,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            rules: Vec::new(),
            filter_error: None,
            objects: HashMap::new(),
            stuck: HashSet::new(),
            unready_pods: HashSet::new(),
            nodes_ready: true,
            services: HashSet::new(),
            tools: ["curl", "iptables", "systemctl", "sh"]
                .into_iter()
                .map(String::from)
                .collect(),
            files: HashMap::new(),
            failures: Vec::new(),
            commands: Vec::new(),
            applied: Vec::new(),
            cpus: 16,
            memory_gb: 64,
            disk_gb: 500,
            mounts: Vec::new(),
            processes: Vec::new(),
        }
    }
}

impl HostState {
    fn take_failure(&mut self, text: &str) -> bool {
        let Some(entry) = self.failures.iter_mut().find(|(needle, left)| *left > 0 && text.contains(needle.as_str())) else {
            return false;
        };
        entry.1 -= 1;
        true
    }

    fn cluster_up(&self) -> bool {
        self.services.contains(CLUSTER_SERVICE)
    }

    fn wipe_cluster(&mut self) {
        self.services.remove(CLUSTER_SERVICE);
        self.tools.remove("rke2");
        self.tools.remove("rke2-uninstall.sh");
        self.objects.clear();
        self.stuck.clear();
        self.processes.clear();
        self.mounts.clear();
    }

    fn remove(&mut self, target: &ResourceRef) {
        if self.stuck.contains(target) {
            if let Some(object) = self.objects.get_mut(target) {
                object.terminating = true;
            }
            return;
        }
        self.objects.remove(target);
        if target.kind == "Namespace" {
            let ns = target.name.clone();
            let stuck = self.stuck.clone();
            self.objects
                .retain(|r, _| r.namespace.as_deref() != Some(ns.as_str()) || stuck.contains(r));
        }
    }
}

/// A fake host implementing every collaborator trait in memory.
///
/// Commands are interpreted just enough for the catalog's host steps:
/// `systemctl`, the distribution's install and uninstall scripts, tool
/// lookups, fact gathering and file writes. Everything else succeeds with
/// empty output unless a failure was scripted with
/// [`fail_matching`](Self::fail_matching).
#[derive(Debug, Default)]
pub struct FakeHost {
    state: Mutex<HostState>,
}

impl FakeHost {
    /// Creates a fresh host with no cluster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a host whose cluster service is already running.
    #[must_use]
    pub fn with_cluster() -> Self {
        let host = Self::new();
        host.start_cluster();
        host
    }

    /// Marks the cluster as installed and running.
    pub fn start_cluster(&self) {
        let mut state = self.state.lock();
        state.services.insert(CLUSTER_SERVICE.to_string());
        state.tools.insert("rke2".to_string());
        state.tools.insert("rke2-uninstall.sh".to_string());
    }

    /// Returns true if the cluster service is running.
    #[must_use]
    pub fn cluster_running(&self) -> bool {
        self.state.lock().cluster_up()
    }

    /// Adds a rule at the bottom of its chain.
    pub fn seed_rule(&self, rule: FilterRule) {
        self.state.lock().rules.push(rule);
    }

    /// Removes every packet-filter rule.
    pub fn flush(&self) {
        self.state.lock().rules.clear();
    }

    /// Returns the packet-filter rules, highest priority first.
    #[must_use]
    pub fn rules(&self) -> Vec<FilterRule> {
        self.state.lock().rules.clone()
    }

    /// Makes every packet-filter call fail.
    pub fn break_filter(&self, reason: impl Into<String>) {
        self.state.lock().filter_error = Some(reason.into());
    }

    /// Fails the next `times` commands or applies whose rendering contains
    /// `needle`.
    pub fn fail_matching(&self, needle: impl Into<String>, times: usize) {
        self.state.lock().failures.push((needle.into(), times));
    }

    /// Makes deletion of `target` hang until its finalizers are stripped.
    pub fn make_stuck(&self, target: ResourceRef) {
        self.state.lock().stuck.insert(target);
    }

    /// Marks pods in `namespace` as not ready.
    pub fn set_pods_unready(&self, namespace: impl Into<String>) {
        self.state.lock().unready_pods.insert(namespace.into());
    }

    /// Sets node readiness.
    pub fn set_nodes_ready(&self, ready: bool) {
        self.state.lock().nodes_ready = ready;
    }

    /// Removes a host tool.
    pub fn remove_tool(&self, tool: &str) {
        self.state.lock().tools.remove(tool);
    }

    /// Sets hardware facts.
    pub fn set_facts(&self, cpus: u32, memory_gb: u32, disk_gb: u32) {
        let mut state = self.state.lock();
        state.cpus = cpus;
        state.memory_gb = memory_gb;
        state.disk_gb = disk_gb;
    }

    /// Adds a leftover process and mount for residual checks.
    pub fn leave_residue(&self, process: impl Into<String>, mount: impl Into<String>) {
        let mut state = self.state.lock();
        state.processes.push(process.into());
        state.mounts.push(mount.into());
    }

    /// Drops an object as if it had been deleted out of band.
    pub fn delete_object(&self, target: &ResourceRef) {
        self.state.lock().objects.remove(target);
    }

    /// Overwrites the fingerprint recorded on an object.
    pub fn tamper(&self, target: &ResourceRef, fingerprint: &str) {
        if let Some(object) = self.state.lock().objects.get_mut(target) {
            object.fingerprint = Some(fingerprint.to_string());
        }
    }

    /// Returns true if the object exists.
    #[must_use]
    pub fn has_object(&self, target: &ResourceRef) -> bool {
        self.state.lock().objects.contains_key(target)
    }

    /// Number of objects in the cluster.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Every desired state applied, in order.
    #[must_use]
    pub fn applied(&self) -> Vec<DesiredState> {
        self.state.lock().applied.clone()
    }

    /// Every command run, in order.
    #[must_use]
    pub fn commands(&self) -> Vec<CommandSpec> {
        self.state.lock().commands.clone()
    }

    /// Number of commands whose rendering contains `needle`.
    #[must_use]
    pub fn command_count(&self, needle: &str) -> usize {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|c| c.display().contains(needle))
            .count()
    }

    /// Contents written to `path` through `install`.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<String> {
        self.state.lock().files.get(path).cloned()
    }

    fn interpret(state: &mut HostState, spec: &CommandSpec) -> CommandOutput {
        let args: Vec<&str> = spec.args.iter().map(String::as_str).collect();
        match (spec.program.as_str(), args.as_slice()) {
            ("systemctl", [.., "is-active", service] | [.., "is-active", "--quiet", service]) => {
                if state.services.contains(*service) {
                    CommandOutput::ok("active")
                } else {
                    CommandOutput::failed(3, "inactive")
                }
            }
            ("systemctl", ["enable", "--now", service]) => {
                state.services.insert((*service).to_string());
                CommandOutput::ok("")
            }
            ("systemctl", ["restart", service]) => {
                state.services.insert((*service).to_string());
                CommandOutput::ok("")
            }
            ("systemctl", ["disable", "--now", service] | ["stop", service]) => {
                state.services.remove(*service);
                CommandOutput::ok("")
            }
            ("sh", ["-c", script]) if script.starts_with("command -v ") => {
                let tool = script.trim_start_matches("command -v ").split_whitespace().next().unwrap_or_default();
                if state.tools.contains(tool) {
                    CommandOutput::ok(format!("/usr/bin/{tool}"))
                } else {
                    CommandOutput::failed(1, "")
                }
            }
            ("sh", ["-c", script]) if script.contains("rke2-uninstall.sh") => {
                state.wipe_cluster();
                CommandOutput::ok("")
            }
            ("sh", ["-c", script]) if script.contains("get.rke2.io") => {
                state.tools.insert("rke2".to_string());
                state.tools.insert("rke2-uninstall.sh".to_string());
                CommandOutput::ok("")
            }
            ("install", [.., path]) => {
                state
                    .files
                    .insert((*path).to_string(), spec.stdin.clone().unwrap_or_default());
                CommandOutput::ok("")
            }
            ("nproc", _) => CommandOutput::ok(format!("{}\n", state.cpus)),
            ("cat", ["/proc/meminfo"]) => CommandOutput::ok(format!(
                "MemTotal:       {} kB\nMemFree:         1024 kB\n",
                u64::from(state.memory_gb) * 1024 * 1024
            )),
            ("cat", ["/proc/mounts"]) => CommandOutput::ok(
                state
                    .mounts
                    .iter()
                    .map(|m| format!("tmpfs {m} tmpfs rw 0 0\n"))
                    .collect::<String>(),
            ),
            ("cat", [path]) => match state.files.get(*path) {
                Some(contents) => CommandOutput::ok(contents.clone()),
                None => CommandOutput::failed(1, format!("cat: {path}: No such file or directory")),
            },
            ("df", [.., path]) => CommandOutput::ok(format!(
                "Filesystem 1024-blocks Used Available Capacity Mounted on\n/dev/sda1 999999999 1 {} 1% {path}\n",
                u64::from(state.disk_gb) * 1024 * 1024
            )),
            ("pgrep", _) => {
                if state.processes.is_empty() {
                    CommandOutput::failed(1, "")
                } else {
                    CommandOutput::ok(state.processes.join("\n"))
                }
            }
            ("ip", _) => CommandOutput::ok("default via 10.0.0.1 dev eth0 proto static\n"),
            _ => CommandOutput::ok(""),
        }
    }

    fn filter_check(&self) -> Result<(), CollabError> {
        match &self.state.lock().filter_error {
            Some(reason) => Err(CollabError::Exit {
                command: "iptables".to_string(),
                code: 4,
                output: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

fn cluster_unreachable(what: &str) -> CollabError {
    CollabError::Exit {
        command: format!("kubectl {what}"),
        code: 1,
        output: "The connection to the server 127.0.0.1:6443 was refused".to_string(),
    }
}

#[async_trait]
impl CommandRunner for FakeHost {
    async fn run_command(&self, spec: &CommandSpec) -> Result<CommandOutput, CollabError> {
        let mut state = self.state.lock();
        state.commands.push(spec.clone());
        if state.take_failure(&spec.display()) {
            return Ok(CommandOutput::failed(1, format!("{} failed", spec.program)));
        }
        Ok(Self::interpret(&mut state, spec))
    }
}

#[async_trait]
impl ClusterClient for FakeHost {
    async fn apply_desired_state(&self, desired: &DesiredState) -> Result<(), CollabError> {
        let mut state = self.state.lock();
        let target = desired.target();
        if !state.cluster_up() {
            return Err(cluster_unreachable("apply"));
        }
        if state.take_failure(&target.name) {
            return Err(CollabError::Exit {
                command: format!("apply {target}"),
                code: 1,
                output: "admission webhook denied the request".to_string(),
            });
        }
        state.applied.push(desired.clone());

        match desired {
            DesiredState::Namespace { .. } => {
                state.objects.entry(target).or_insert(FakeObject {
                    fingerprint: None,
                    terminating: false,
                });
            }
            DesiredState::HelmRelease(release) => {
                state
                    .objects
                    .entry(ResourceRef::namespace(release.namespace.clone()))
                    .or_insert(FakeObject {
                        fingerprint: None,
                        terminating: false,
                    });
                state.objects.insert(
                    target,
                    FakeObject {
                        fingerprint: Some(desired.fingerprint()),
                        terminating: false,
                    },
                );
            }
            DesiredState::Manifest { .. } => {
                state.objects.insert(
                    target,
                    FakeObject {
                        fingerprint: Some(desired.fingerprint()),
                        terminating: false,
                    },
                );
            }
            DesiredState::Absent(target) => state.remove(target),
            DesiredState::Patch { target, .. } => {
                if state.stuck.remove(target) {
                    state.remove(target);
                }
            }
        }
        Ok(())
    }

    async fn query_readiness(&self, selector: &Selector) -> Result<ReadyState, CollabError> {
        let state = self.state.lock();
        if !state.cluster_up() {
            return Err(cluster_unreachable("get"));
        }

        let lookup = |target: &ResourceRef| match state.objects.get(target) {
            None => ReadyState::absent(),
            Some(object) if object.terminating => ReadyState::not_ready("terminating"),
            Some(object) => ReadyState::ready(object.fingerprint.clone()),
        };

        Ok(match selector {
            Selector::Resource(target) => lookup(target),
            Selector::Release { namespace, name } => {
                lookup(&ResourceRef::release(namespace.clone(), name.clone()))
            }
            Selector::Pods { namespace, .. } => {
                let has_release = state
                    .objects
                    .keys()
                    .any(|r| r.is_release() && r.namespace.as_deref() == Some(namespace.as_str()));
                if !has_release {
                    ReadyState::absent()
                } else if state.unready_pods.contains(namespace) {
                    ReadyState::not_ready("0/1 pods ready")
                } else {
                    ReadyState::ready(None)
                }
            }
            Selector::Nodes => {
                if state.nodes_ready {
                    ReadyState::ready(None)
                } else {
                    ReadyState::not_ready("0/1 nodes ready")
                }
            }
        })
    }
}

#[async_trait]
impl PacketFilter for FakeHost {
    async fn contains(&self, rule: &FilterRule) -> Result<bool, CollabError> {
        self.filter_check()?;
        Ok(self.state.lock().rules.contains(rule))
    }

    async fn insert_first(&self, rule: &FilterRule) -> Result<(), CollabError> {
        self.filter_check()?;
        self.state.lock().rules.insert(0, rule.clone());
        Ok(())
    }

    async fn remove(&self, rule: &FilterRule) -> Result<(), CollabError> {
        self.filter_check()?;
        self.state.lock().rules.retain(|r| r != rule);
        Ok(())
    }
}
