//! Failure tolerance policy.
//!
//! Install runs stop at the first failure; uninstall runs record the failure
//! and keep tearing down.

use crate::core::{FailureKind, InstallMode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How to handle step failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Stop the pipeline on first failure.
    #[default]
    FailFast,
    /// Record the failure and attempt every remaining step.
    ContinueOnError,
}

impl FailureMode {
    /// Returns the mode a pipeline runs with.
    #[must_use]
    pub const fn for_mode(mode: InstallMode) -> Self {
        match mode {
            InstallMode::Install => Self::FailFast,
            InstallMode::Uninstall => Self::ContinueOnError,
        }
    }
}

/// Record of a step failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Step identifier.
    pub step: String,
    /// Failure classification.
    pub kind: FailureKind,
    /// Error message.
    pub error: String,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    /// Creates a new failure record.
    #[must_use]
    pub fn new(step: impl Into<String>, kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            kind,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Collects failures and decides whether execution continues.
#[derive(Debug, Default)]
pub struct FailureCollector {
    /// Failure mode.
    pub mode: FailureMode,
    failures: Vec<FailureRecord>,
    interrupted: bool,
}

impl FailureCollector {
    /// Creates a new failure collector.
    #[must_use]
    pub const fn new(mode: FailureMode) -> Self {
        Self {
            mode,
            failures: Vec::new(),
            interrupted: false,
        }
    }

    /// Records a step failure.
    pub fn record(&mut self, record: FailureRecord) {
        if record.kind == FailureKind::Interrupted {
            self.interrupted = true;
        }
        self.failures.push(record);
    }

    /// Returns true if execution should stop.
    ///
    /// An interrupt stops every pipeline regardless of mode.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        if self.interrupted {
            return true;
        }
        match self.mode {
            FailureMode::FailFast => !self.failures.is_empty(),
            FailureMode::ContinueOnError => false,
        }
    }

    /// Returns true if any step failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    /// Returns all failures.
    #[must_use]
    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    /// Consumes the collector.
    #[must_use]
    pub fn into_failures(self) -> Vec<FailureRecord> {
        self.failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_mode_for_mode() {
        assert_eq!(FailureMode::for_mode(InstallMode::Install), FailureMode::FailFast);
        assert_eq!(
            FailureMode::for_mode(InstallMode::Uninstall),
            FailureMode::ContinueOnError
        );
    }

    #[test]
    fn test_fail_fast_stops() {
        let mut collector = FailureCollector::new(FailureMode::FailFast);
        assert!(!collector.should_stop());

        collector.record(FailureRecord::new("istio", FailureKind::Apply, "helm failed"));
        assert!(collector.should_stop());
        assert!(collector.has_failures());
    }

    #[test]
    fn test_continue_on_error_keeps_going() {
        let mut collector = FailureCollector::new(FailureMode::ContinueOnError);
        collector.record(FailureRecord::new("a", FailureKind::Apply, "x"));
        collector.record(FailureRecord::new("b", FailureKind::Timeout, "y"));

        assert!(!collector.should_stop());
        assert_eq!(collector.failures().len(), 2);
    }

    #[test]
    fn test_interrupt_stops_teardown() {
        let mut collector = FailureCollector::new(FailureMode::ContinueOnError);
        collector.record(FailureRecord::new("a", FailureKind::Interrupted, "ctrl-c"));
        assert!(collector.should_stop());
    }
}
