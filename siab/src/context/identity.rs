//! Run identity.

use crate::core::InstallMode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// Unique run identifier.
    pub run_id: Uuid,
    /// Pipeline mode.
    pub mode: InstallMode,
    /// When the run started.
    pub started_at: DateTime<Utc>,
}

impl RunIdentity {
    /// Creates a new identity for a run starting now.
    #[must_use]
    pub fn new(mode: InstallMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode,
            started_at: Utc::now(),
        }
    }

    /// Short form of the run id for log lines.
    #[must_use]
    pub fn short_id(&self) -> String {
        self.run_id.simple().to_string()[..8].to_string()
    }
}
