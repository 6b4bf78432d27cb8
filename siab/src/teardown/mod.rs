//! Uninstall lifecycle: confirmation, snapshot, forced removal and the
//! residual scan.
//!
//! The [`TeardownTracker`] enforces the phase order
//! `NotStarted -> ConfirmationPending -> SnapshotTaken | SnapshotSkipped ->
//! TearingDown -> Verifying -> Done`.

mod confirm;
mod finalizers;
mod residual;
mod snapshot;

pub use confirm::{ConfirmationPolicy, Confirmer, TerminalConfirmer, CONFIRMATION_WORD};
pub use finalizers::{remove_with_fallback, RemovalOutcome};
pub use residual::{Residual, ResidualKind, ResidualReport, ResidualScan};
pub use snapshot::{snapshot_dir_name, take_snapshot, SnapshotPlan, SnapshotReport};

#[cfg(test)]
pub use confirm::MockConfirmer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Phase of an uninstall run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UninstallPhase {
    /// Nothing has happened yet.
    #[default]
    NotStarted,
    /// Waiting for the operator to confirm.
    ConfirmationPending,
    /// A snapshot was written.
    SnapshotTaken,
    /// No snapshot was requested.
    SnapshotSkipped,
    /// The uninstall registry is running.
    TearingDown,
    /// The residual scan is running.
    Verifying,
    /// Finished.
    Done,
}

impl fmt::Display for UninstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::ConfirmationPending => "confirmation_pending",
            Self::SnapshotTaken => "snapshot_taken",
            Self::SnapshotSkipped => "snapshot_skipped",
            Self::TearingDown => "tearing_down",
            Self::Verifying => "verifying",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

impl UninstallPhase {
    /// Returns true if `next` directly follows this phase.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::ConfirmationPending)
                | (Self::ConfirmationPending, Self::SnapshotTaken | Self::SnapshotSkipped)
                | (Self::SnapshotTaken | Self::SnapshotSkipped, Self::TearingDown)
                | (Self::TearingDown, Self::Verifying)
                | (Self::Verifying, Self::Done)
        )
    }
}

/// An out-of-order phase change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Invalid uninstall phase change {from} -> {to}")]
pub struct PhaseError {
    /// Current phase.
    pub from: UninstallPhase,
    /// Rejected phase.
    pub to: UninstallPhase,
}

/// Tracks the phase of one uninstall run and when each was entered.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TeardownTracker {
    phase: UninstallPhase,
    history: Vec<(UninstallPhase, DateTime<Utc>)>,
}

impl TeardownTracker {
    /// Creates a tracker in [`UninstallPhase::NotStarted`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> UninstallPhase {
        self.phase
    }

    /// Phases entered so far, oldest first.
    #[must_use]
    pub fn history(&self) -> &[(UninstallPhase, DateTime<Utc>)] {
        &self.history
    }

    /// Moves to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`PhaseError`] if `next` does not follow the current phase.
    pub fn advance(&mut self, next: UninstallPhase) -> Result<(), PhaseError> {
        if !self.phase.can_advance_to(next) {
            return Err(PhaseError {
                from: self.phase,
                to: next,
            });
        }
        debug!(from = %self.phase, to = %next, "Uninstall phase");
        self.phase = next;
        self.history.push((next, Utc::now()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_full_lifecycle() {
        let mut tracker = TeardownTracker::new();
        for phase in [
            UninstallPhase::ConfirmationPending,
            UninstallPhase::SnapshotSkipped,
            UninstallPhase::TearingDown,
            UninstallPhase::Verifying,
            UninstallPhase::Done,
        ] {
            tracker.advance(phase).unwrap();
        }
        assert_eq!(tracker.phase(), UninstallPhase::Done);
        assert_eq!(tracker.history().len(), 5);
    }

    #[test]
    fn test_rejects_skipping_confirmation() {
        let mut tracker = TeardownTracker::new();
        let err = tracker.advance(UninstallPhase::TearingDown).unwrap_err();
        assert_eq!(err.from, UninstallPhase::NotStarted);
        assert_eq!(tracker.phase(), UninstallPhase::NotStarted);
        assert!(tracker.history().is_empty());
    }

    #[test]
    fn test_snapshot_branches() {
        assert!(UninstallPhase::ConfirmationPending.can_advance_to(UninstallPhase::SnapshotTaken));
        assert!(UninstallPhase::SnapshotTaken.can_advance_to(UninstallPhase::TearingDown));
        assert!(!UninstallPhase::SnapshotTaken.can_advance_to(UninstallPhase::SnapshotSkipped));
        assert!(!UninstallPhase::Done.can_advance_to(UninstallPhase::NotStarted));
    }
}
