//! Per-step record kept by the status table.

use super::{Mutation, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a step ended `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A step's apply surfaced a probe error of a collaborator it relies on.
    Probe,
    /// The apply returned an error.
    Apply,
    /// The apply succeeded but the post-condition check did not.
    Verify,
    /// The safety guard could not confirm or restore the management channel.
    Safety,
    /// A bounded wait or subprocess ran out of time.
    Timeout,
    /// The run was interrupted while the apply was in flight.
    Interrupted,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Probe => write!(f, "probe"),
            Self::Apply => write!(f, "apply"),
            Self::Verify => write!(f, "verify"),
            Self::Safety => write!(f, "safety"),
            Self::Timeout => write!(f, "timeout"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Everything the executor knows about one step in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Stable step identifier.
    pub id: String,
    /// Position in the registry.
    pub order: usize,
    /// Human-readable description.
    pub description: String,
    /// Mutation class of the step.
    pub mutation: Mutation,
    /// Current status.
    pub status: StepStatus,
    /// Diagnostic set on skip or failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Probe error recorded when the probe could not decide.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe_error: Option<String>,
    /// Failure classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Whether the apply was invoked in this run.
    #[serde(default)]
    pub applied: bool,
    /// When the step left `Pending`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the step reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    /// Creates a pending record.
    #[must_use]
    pub fn pending(
        id: impl Into<String>,
        order: usize,
        description: impl Into<String>,
        mutation: Mutation,
    ) -> Self {
        Self {
            id: id.into(),
            order,
            description: description.into(),
            mutation,
            status: StepStatus::Pending,
            message: None,
            probe_error: None,
            failure: None,
            applied: false,
            started_at: None,
            ended_at: None,
        }
    }

    /// Returns the duration in milliseconds, if the step has finished.
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }

    /// Returns true if the step failed.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status == StepStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_record() {
        let record = StepRecord::pending("metallb", 4, "Load balancer", Mutation::Workload);

        assert_eq!(record.id, "metallb");
        assert_eq!(record.order, 4);
        assert_eq!(record.status, StepStatus::Pending);
        assert!(!record.applied);
        assert!(record.duration_ms().is_none());
    }

    #[test]
    fn test_record_serialization_omits_empty_fields() {
        let record = StepRecord::pending("prepare-host", 0, "Directories", Mutation::Local);
        let json = serde_json::to_value(&record).unwrap();

        assert!(json.get("message").is_none());
        assert!(json.get("failure").is_none());
        assert_eq!(json["status"], "pending");
    }

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::Safety.to_string(), "safety");
        assert_eq!(FailureKind::Interrupted.to_string(), "interrupted");
    }
}
