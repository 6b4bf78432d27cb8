//! Events emitted by the executor.

use super::{InstallMode, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A status transition of a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepEvent {
    /// Step identifier.
    pub step_id: String,
    /// Position in the registry.
    pub order: usize,
    /// Total steps in the registry.
    pub total: usize,
    /// Status before the transition.
    pub from: StepStatus,
    /// Status after the transition.
    pub to: StepStatus,
    /// Diagnostic attached to the transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the transition happened.
    pub timestamp: DateTime<Utc>,
}

/// Everything an [`EventSink`](crate::events::EventSink) can observe during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A run started.
    RunStarted {
        /// Run identifier.
        run_id: String,
        /// Pipeline mode.
        mode: InstallMode,
        /// Registry size.
        total: usize,
    },
    /// A step changed status.
    Transition(StepEvent),
    /// A probe could not determine state; the step will be applied.
    ProbeWarning {
        /// Step identifier.
        step_id: String,
        /// Probe error.
        error: String,
    },
    /// The safety guard asserted the keep-alive rule set.
    SafetyCheck {
        /// Step identifier.
        step_id: String,
        /// "pre" or "post".
        phase: String,
        /// Number of rules that had to be re-inserted.
        restored: usize,
    },
    /// A run finished.
    RunFinished {
        /// Run identifier.
        run_id: String,
        /// Steps that reached a terminal status.
        completed: usize,
        /// Steps that failed.
        failed: usize,
        /// Whether the run was interrupted.
        interrupted: bool,
    },
}

impl RunEvent {
    /// Returns the dotted event name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RunStarted { .. } => "run.started",
            Self::Transition(_) => "step.transition",
            Self::ProbeWarning { .. } => "step.probe_warning",
            Self::SafetyCheck { .. } => "safety.check",
            Self::RunFinished { .. } => "run.finished",
        }
    }

    /// Returns the step this event concerns, if any.
    #[must_use]
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::Transition(event) => Some(&event.step_id),
            Self::ProbeWarning { step_id, .. } | Self::SafetyCheck { step_id, .. } => Some(step_id),
            Self::RunStarted { .. } | Self::RunFinished { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let event = RunEvent::ProbeWarning {
            step_id: "longhorn".to_string(),
            error: "kubectl timed out".to_string(),
        };
        assert_eq!(event.name(), "step.probe_warning");
        assert_eq!(event.step_id(), Some("longhorn"));
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = RunEvent::RunStarted {
            run_id: "abc".to_string(),
            mode: InstallMode::Uninstall,
            total: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "run_started");
        assert_eq!(json["mode"], "uninstall");
    }
}
