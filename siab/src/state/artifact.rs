//! Status artifact written after every transition.

use crate::context::RunIdentity;
use crate::core::{InstallMode, StepEvent, StepRecord};
use crate::errors::SiabError;
use crate::pipeline::{FailureRecord, RunObserver, RunResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Path of the status artifact for `mode`.
#[must_use]
pub fn status_path(state_dir: &Path, mode: InstallMode) -> PathBuf {
    state_dir.join(format!("status-{mode}.json"))
}

/// Contents of `status-<mode>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusArtifact {
    /// Run identity.
    pub run: RunIdentity,
    /// Last write.
    pub updated_at: DateTime<Utc>,
    /// Whether the run has finished.
    pub finished: bool,
    /// Every step in registry order.
    pub records: Vec<StepRecord>,
    /// Failures, filled in at the end of the run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureRecord>,
    /// The step an install halted at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted_at: Option<String>,
    /// Whether the run was interrupted.
    #[serde(default)]
    pub interrupted: bool,
}

impl StatusArtifact {
    /// Reads an artifact.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, SiabError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Writes the artifact atomically: temp file, then rename.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn store(&self, path: &Path) -> Result<(), SiabError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Observer keeping the status artifact current.
///
/// Write failures are logged and never affect the run.
#[derive(Debug)]
pub struct StatusWriter {
    path: PathBuf,
    failed_writes: Mutex<usize>,
}

impl StatusWriter {
    /// Writes to `status-<mode>.json` under `state_dir`.
    #[must_use]
    pub fn new(state_dir: &Path, mode: InstallMode) -> Self {
        Self {
            path: status_path(state_dir, mode),
            failed_writes: Mutex::new(0),
        }
    }

    /// Artifact path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of writes that failed.
    #[must_use]
    pub fn failed_writes(&self) -> usize {
        *self.failed_writes.lock()
    }

    fn write(&self, artifact: &StatusArtifact) {
        match artifact.store(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Status artifact written"),
            Err(e) => {
                *self.failed_writes.lock() += 1;
                warn!(path = %self.path.display(), error = %e, "Cannot write status artifact");
            }
        }
    }
}

impl RunObserver for StatusWriter {
    fn on_update(&self, run: &RunIdentity, records: &[StepRecord], _event: &StepEvent) {
        self.write(&StatusArtifact {
            run: run.clone(),
            updated_at: Utc::now(),
            finished: false,
            records: records.to_vec(),
            failures: Vec::new(),
            halted_at: None,
            interrupted: false,
        });
    }

    fn on_finish(&self, result: &RunResult) {
        self.write(&StatusArtifact {
            run: result.run.clone(),
            updated_at: result.finished_at,
            finished: true,
            records: result.records.clone(),
            failures: result.failures.clone(),
            halted_at: result.halted_at.clone(),
            interrupted: result.interrupted,
        });
    }
}
