//! Pre-teardown snapshot of configuration artifacts.
//!
//! Best effort: a missing source is listed as skipped, a failed copy is
//! listed as an error, and neither stops the teardown.

use crate::collab::DEFAULT_KUBECONFIG;
use crate::components::CLUSTER_CONFIG_PATH;
use crate::config::SiabConfig;
use crate::state::status_path;
use crate::core::InstallMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What to copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotPlan {
    /// Files and directories to copy.
    pub sources: Vec<PathBuf>,
    /// Where timestamped snapshot directories are created.
    pub backups_dir: PathBuf,
}

impl SnapshotPlan {
    /// Cluster config, kubeconfig, credentials and the last status
    /// artifacts.
    #[must_use]
    pub fn for_config(config: &SiabConfig) -> Self {
        Self {
            sources: vec![
                PathBuf::from(CLUSTER_CONFIG_PATH),
                PathBuf::from(DEFAULT_KUBECONFIG),
                config.credentials_dir(),
                status_path(&config.state_dir, InstallMode::Install),
                status_path(&config.state_dir, InstallMode::Uninstall),
            ],
            backups_dir: config.backups_dir(),
        }
    }
}

/// Result of a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotReport {
    /// Snapshot directory.
    pub dir: PathBuf,
    /// Sources copied.
    pub copied: Vec<PathBuf>,
    /// Sources that did not exist.
    pub skipped: Vec<PathBuf>,
    /// Copy failures.
    pub errors: Vec<String>,
}

impl SnapshotReport {
    /// Returns true if nothing failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Directory name for a snapshot taken at `at`.
#[must_use]
pub fn snapshot_dir_name(at: DateTime<Utc>) -> String {
    at.format("%Y%m%dT%H%M%SZ").to_string()
}

async fn copy_tree(source: &Path, dest: &Path) -> std::io::Result<()> {
    let mut pending = vec![(source.to_path_buf(), dest.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        if tokio::fs::metadata(&from).await?.is_dir() {
            tokio::fs::create_dir_all(&to).await?;
            let mut entries = tokio::fs::read_dir(&from).await?;
            while let Some(entry) = entries.next_entry().await? {
                pending.push((entry.path(), to.join(entry.file_name())));
            }
        } else {
            tokio::fs::copy(&from, &to).await?;
        }
    }
    Ok(())
}

/// Copies every source of `plan` into `<backups_dir>/<timestamp>/`.
pub async fn take_snapshot(plan: &SnapshotPlan, at: DateTime<Utc>) -> SnapshotReport {
    let dir = plan.backups_dir.join(snapshot_dir_name(at));
    let mut report = SnapshotReport {
        dir: dir.clone(),
        ..SnapshotReport::default()
    };

    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        report.errors.push(format!("creating {}: {e}", dir.display()));
        warn!(dir = %dir.display(), error = %e, "Snapshot directory unavailable");
        return report;
    }

    for source in &plan.sources {
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            report.skipped.push(source.clone());
            continue;
        }
        let Some(name) = source.file_name() else {
            report.skipped.push(source.clone());
            continue;
        };
        match copy_tree(source, &dir.join(name)).await {
            Ok(()) => report.copied.push(source.clone()),
            Err(e) => {
                warn!(source = %source.display(), error = %e, "Snapshot copy failed");
                report.errors.push(format!("{}: {e}", source.display()));
            }
        }
    }

    info!(
        dir = %dir.display(),
        copied = report.copied.len(),
        skipped = report.skipped.len(),
        errors = report.errors.len(),
        "Snapshot taken"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dir_name() {
        let at = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(snapshot_dir_name(at), "20260304T050607Z");
    }

    #[tokio::test]
    async fn test_copies_files_and_directories() {
        let root = tempfile::tempdir().unwrap();
        let creds = root.path().join("credentials");
        std::fs::create_dir_all(creds.join("keycloak")).unwrap();
        std::fs::write(creds.join("keycloak").join("admin"), "secret").unwrap();
        let status = root.path().join("status-install.json");
        std::fs::write(&status, "{}").unwrap();
        let missing = root.path().join("rke2.yaml");

        let plan = SnapshotPlan {
            sources: vec![creds.clone(), status.clone(), missing.clone()],
            backups_dir: root.path().join("backups"),
        };
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let report = take_snapshot(&plan, at).await;

        assert!(report.is_clean());
        assert_eq!(report.copied, vec![creds, status]);
        assert_eq!(report.skipped, vec![missing]);
        let copied = report.dir.join("credentials").join("keycloak").join("admin");
        assert_eq!(std::fs::read_to_string(copied).unwrap(), "secret");
    }

    #[tokio::test]
    async fn test_unwritable_destination_is_reported() {
        let root = tempfile::tempdir().unwrap();
        let blocker = root.path().join("backups");
        std::fs::write(&blocker, "not a directory").unwrap();

        let plan = SnapshotPlan {
            sources: vec![],
            backups_dir: blocker,
        };
        let report = take_snapshot(&plan, Utc::now()).await;
        assert!(!report.is_clean());
    }
}
