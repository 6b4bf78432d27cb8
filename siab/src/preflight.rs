//! Host resource checks run before the install pipeline starts.

use crate::collab::{CommandRunner, CommandSpec};
use crate::config::Sizing;
use crate::errors::{CollabError, PreflightError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Tools the install steps shell out to.
pub const REQUIRED_TOOLS: [&str; 3] = ["curl", "iptables", "systemctl"];

const FACT_TIMEOUT: Duration = Duration::from_secs(10);
const KIB_PER_GIB: u64 = 1024 * 1024;

/// What the host offers. `None` means the fact could not be gathered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HostFacts {
    /// Logical CPUs.
    pub cpus: Option<u32>,
    /// Total memory in GiB.
    pub memory_gb: Option<u64>,
    /// Free disk in GiB on the data filesystem.
    pub disk_gb: Option<u64>,
    /// Required tools missing from `PATH`.
    pub missing_tools: Vec<String>,
    /// Why facts could not be gathered.
    pub errors: Vec<String>,
}

fn parse_meminfo(text: &str) -> Option<u64> {
    text.lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse::<u64>().ok())
}

fn parse_df_available(text: &str) -> Option<u64> {
    text.lines()
        .nth(1)
        .and_then(|line| line.split_whitespace().nth(3))
        .and_then(|kb| kb.parse::<u64>().ok())
}

async fn nearest_existing(path: &Path) -> PathBuf {
    for candidate in path.ancestors() {
        if tokio::fs::try_exists(candidate).await.unwrap_or(false) {
            return candidate.to_path_buf();
        }
    }
    PathBuf::from("/")
}

async fn stdout_of(runner: &dyn CommandRunner, spec: CommandSpec) -> Result<String, CollabError> {
    Ok(crate::collab::run_checked(runner, &spec.timeout(FACT_TIMEOUT)).await?.stdout)
}

impl HostFacts {
    /// Gathers facts, measuring free disk on the filesystem holding
    /// `data_dir`.
    pub async fn gather(runner: &dyn CommandRunner, data_dir: &Path) -> Self {
        let mut facts = Self::default();

        match stdout_of(runner, CommandSpec::new("nproc")).await {
            Ok(out) => match out.trim().parse() {
                Ok(n) => facts.cpus = Some(n),
                Err(_) => facts.errors.push(format!("cannot parse CPU count '{}'", out.trim())),
            },
            Err(e) => facts.errors.push(format!("cannot determine CPU count: {e}")),
        }

        match stdout_of(runner, CommandSpec::new("cat").arg("/proc/meminfo")).await {
            Ok(out) => match parse_meminfo(&out) {
                Some(kb) => facts.memory_gb = Some(kb / KIB_PER_GIB),
                None => facts.errors.push("cannot find MemTotal in /proc/meminfo".to_string()),
            },
            Err(e) => facts.errors.push(format!("cannot determine memory: {e}")),
        }

        let target = nearest_existing(data_dir).await;
        let df = CommandSpec::new("df").arg("-Pk").arg(target.display().to_string());
        match stdout_of(runner, df).await {
            Ok(out) => match parse_df_available(&out) {
                Some(kb) => facts.disk_gb = Some(kb / KIB_PER_GIB),
                None => facts.errors.push(format!("cannot parse df output for {}", target.display())),
            },
            Err(e) => facts.errors.push(format!("cannot determine free disk: {e}")),
        }

        for tool in REQUIRED_TOOLS {
            let lookup = CommandSpec::shell(format!("command -v {tool}")).timeout(FACT_TIMEOUT);
            match runner.run_command(&lookup).await {
                Ok(out) if out.success() => {}
                Ok(_) => facts.missing_tools.push(tool.to_string()),
                Err(e) => facts.errors.push(format!("cannot look up {tool}: {e}")),
            }
        }

        facts
    }

    /// Compares the facts with `sizing`, collecting every unmet
    /// requirement.
    ///
    /// # Errors
    ///
    /// Returns a [`PreflightError`] listing all failures.
    pub fn check(&self, sizing: &Sizing) -> Result<(), PreflightError> {
        let mut failures = self.errors.clone();

        if let Some(cpus) = self.cpus.filter(|c| *c < sizing.min_cpus) {
            failures.push(format!("{cpus} CPUs available, {} required", sizing.min_cpus));
        }
        if let Some(mem) = self.memory_gb.filter(|m| *m < u64::from(sizing.min_memory_gb)) {
            failures.push(format!("{mem} GiB memory available, {} GiB required", sizing.min_memory_gb));
        }
        if let Some(disk) = self.disk_gb.filter(|d| *d < u64::from(sizing.min_disk_gb)) {
            failures.push(format!("{disk} GiB free disk available, {} GiB required", sizing.min_disk_gb));
        }
        for tool in &self.missing_tools {
            failures.push(format!("required tool '{tool}' not found"));
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PreflightError { failures })
        }
    }
}

/// Gathers host facts and checks them against `sizing`.
///
/// # Errors
///
/// Returns a [`PreflightError`] listing every unmet requirement.
pub async fn run_preflight(
    runner: &dyn CommandRunner,
    sizing: &Sizing,
    data_dir: &Path,
) -> Result<HostFacts, PreflightError> {
    let facts = HostFacts::gather(runner, data_dir).await;
    match facts.check(sizing) {
        Ok(()) => {
            info!(
                cpus = facts.cpus,
                memory_gb = facts.memory_gb,
                disk_gb = facts.disk_gb,
                "Preflight passed"
            );
            Ok(facts)
        }
        Err(e) => {
            for failure in &e.failures {
                warn!(failure = %failure, "Preflight requirement unmet");
            }
            Err(e)
        }
    }
}
