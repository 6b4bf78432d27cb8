//! Post-teardown residual scan. Reports only; nothing is remediated.

use crate::collab::{CommandRunner, CommandSpec};
use crate::config::SiabConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const PROCESS_PATTERN: &str = "rke2|containerd-shim|kubelet";

/// What kind of residue was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidualKind {
    /// A running process.
    Process,
    /// A mount point.
    Mount,
    /// A directory on disk.
    Directory,
}

impl fmt::Display for ResidualKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process => write!(f, "process"),
            Self::Mount => write!(f, "mount"),
            Self::Directory => write!(f, "directory"),
        }
    }
}

/// One leftover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Residual {
    /// Kind of residue.
    pub kind: ResidualKind,
    /// Process line, mount point or path.
    pub detail: String,
}

/// Findings of a residual scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResidualReport {
    /// Everything left behind.
    pub findings: Vec<Residual>,
    /// Checks that could not run.
    pub unchecked: Vec<String>,
}

impl ResidualReport {
    /// Returns true if nothing was found and every check ran.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty() && self.unchecked.is_empty()
    }

    /// Findings of one kind.
    pub fn of_kind(&self, kind: ResidualKind) -> impl Iterator<Item = &Residual> {
        self.findings.iter().filter(move |r| r.kind == kind)
    }

    fn push(&mut self, kind: ResidualKind, detail: impl Into<String>) {
        self.findings.push(Residual {
            kind,
            detail: detail.into(),
        });
    }
}

/// Where to look.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidualScan {
    /// Mount points under these prefixes count as residue.
    pub mount_prefixes: Vec<PathBuf>,
    /// Directories that should no longer exist.
    pub directories: Vec<PathBuf>,
}

impl ResidualScan {
    /// The cluster's well-known locations plus the data directory.
    #[must_use]
    pub fn for_config(config: &SiabConfig) -> Self {
        let known = [
            PathBuf::from("/var/lib/rancher"),
            PathBuf::from("/var/lib/kubelet"),
            PathBuf::from("/etc/rancher"),
        ];
        let mut directories = vec![config.data_dir.clone()];
        let mut mount_prefixes = vec![config.data_dir.clone(), PathBuf::from("/run/k3s")];
        for path in known {
            if !directories.contains(&path) {
                directories.push(path.clone());
            }
            if !mount_prefixes.contains(&path) {
                mount_prefixes.push(path);
            }
        }
        Self {
            mount_prefixes,
            directories,
        }
    }

    /// Stops looking at `kept` and everything below it.
    #[must_use]
    pub fn keeping(mut self, kept: &Path) -> Self {
        self.directories.retain(|dir| !dir.starts_with(kept));
        self.mount_prefixes.retain(|prefix| !prefix.starts_with(kept));
        self
    }

    /// Runs every check and collects the findings.
    pub async fn run(&self, runner: &dyn CommandRunner) -> ResidualReport {
        let mut report = ResidualReport::default();
        let timeout = Duration::from_secs(10);

        let pgrep = CommandSpec::new("pgrep")
            .args(["-a", "-f", PROCESS_PATTERN])
            .timeout(timeout);
        match runner.run_command(&pgrep).await {
            Ok(out) if out.success() => {
                for line in out.stdout.lines().filter(|l| !l.trim().is_empty()) {
                    report.push(ResidualKind::Process, line.trim());
                }
            }
            Ok(out) if out.code == 1 => {}
            Ok(out) => report.unchecked.push(format!("processes: pgrep exited with {}", out.code)),
            Err(e) => report.unchecked.push(format!("processes: {e}")),
        }

        let mounts = CommandSpec::new("cat").arg("/proc/mounts").timeout(timeout);
        match runner.run_command(&mounts).await {
            Ok(out) if out.success() => {
                for point in out.stdout.lines().filter_map(|l| l.split_whitespace().nth(1)) {
                    if self.mount_prefixes.iter().any(|p| std::path::Path::new(point).starts_with(p)) {
                        report.push(ResidualKind::Mount, point);
                    }
                }
            }
            Ok(out) => report.unchecked.push(format!("mounts: exited with {}", out.code)),
            Err(e) => report.unchecked.push(format!("mounts: {e}")),
        }

        for dir in &self.directories {
            match tokio::fs::try_exists(dir).await {
                Ok(true) => report.push(ResidualKind::Directory, dir.display().to_string()),
                Ok(false) => {}
                Err(e) => report.unchecked.push(format!("{}: {e}", dir.display())),
            }
        }

        for residual in &report.findings {
            warn!(kind = %residual.kind, detail = %residual.detail, "Residual state");
        }
        info!(
            findings = report.findings.len(),
            unchecked = report.unchecked.len(),
            "Residual scan finished"
        );
        report
    }
}
