//! Status table owned by the executor for the lifetime of one run.

use super::{FailureKind, StepEvent, StepRecord, StepStatus};
use chrono::Utc;
use thiserror::Error;

/// Error raised when a transition would break status monotonicity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Illegal transition for step '{step}': {from} -> {to}")]
pub struct TransitionError {
    /// The step.
    pub step: String,
    /// Current status.
    pub from: StepStatus,
    /// Requested status.
    pub to: StepStatus,
}

/// Ordered collection of step records.
#[derive(Debug, Clone, Default)]
pub struct StatusTable {
    records: Vec<StepRecord>,
}

impl StatusTable {
    /// Creates a table from pending records.
    #[must_use]
    pub fn new(records: Vec<StepRecord>) -> Self {
        Self { records }
    }

    /// Returns all records in registry order.
    #[must_use]
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// Consumes the table.
    #[must_use]
    pub fn into_records(self) -> Vec<StepRecord> {
        self.records
    }

    /// Returns the record at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&StepRecord> {
        self.records.get(index)
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the table has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Moves the step at `index` to `to`.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of range or the transition is
    /// not allowed by [`StepStatus::can_transition_to`].
    pub fn transition(
        &mut self,
        index: usize,
        to: StepStatus,
        message: Option<String>,
    ) -> Result<StepEvent, TransitionError> {
        let total = self.records.len();
        let Some(record) = self.records.get_mut(index) else {
            return Err(TransitionError {
                step: format!("#{index}"),
                from: StepStatus::Pending,
                to,
            });
        };

        let from = record.status;
        if !from.can_transition_to(to) {
            return Err(TransitionError {
                step: record.id.clone(),
                from,
                to,
            });
        }

        let now = Utc::now();
        record.status = to;
        if from == StepStatus::Pending {
            record.started_at = Some(now);
        }
        if to == StepStatus::Running {
            record.applied = true;
        }
        if to.is_terminal() {
            record.ended_at = Some(now);
        }
        if message.is_some() {
            record.message.clone_from(&message);
        }

        Ok(StepEvent {
            step_id: record.id.clone(),
            order: record.order,
            total,
            from,
            to,
            message,
            timestamp: now,
        })
    }

    /// Records a probe error against the step.
    pub fn set_probe_error(&mut self, index: usize, error: impl Into<String>) {
        if let Some(record) = self.records.get_mut(index) {
            record.probe_error = Some(error.into());
        }
    }

    /// Records the failure classification against the step.
    pub fn set_failure(&mut self, index: usize, kind: FailureKind) {
        if let Some(record) = self.records.get_mut(index) {
            record.failure = Some(kind);
        }
    }

    /// Counts records with the given status.
    #[must_use]
    pub fn count(&self, status: StepStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }

    /// Counts records that reached a terminal status.
    #[must_use]
    pub fn terminal_count(&self) -> usize {
        self.records.iter().filter(|r| r.status.is_terminal()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Mutation;

    fn table() -> StatusTable {
        StatusTable::new(vec![
            StepRecord::pending("a", 0, "A", Mutation::Local),
            StepRecord::pending("b", 1, "B", Mutation::Workload),
        ])
    }

    #[test]
    fn test_transition_sets_timestamps() {
        let mut table = table();

        let event = table.transition(0, StepStatus::Running, None).unwrap();
        assert_eq!(event.from, StepStatus::Pending);
        assert_eq!(event.total, 2);
        assert!(table.get(0).unwrap().started_at.is_some());
        assert!(table.get(0).unwrap().applied);

        table.transition(0, StepStatus::Done, None).unwrap();
        assert!(table.get(0).unwrap().ended_at.is_some());
        assert_eq!(table.terminal_count(), 1);
    }

    #[test]
    fn test_skip_does_not_mark_applied() {
        let mut table = table();
        table
            .transition(1, StepStatus::Skipped, Some("already satisfied".to_string()))
            .unwrap();

        let record = table.get(1).unwrap();
        assert!(!record.applied);
        assert_eq!(record.message.as_deref(), Some("already satisfied"));
    }

    #[test]
    fn test_terminal_is_monotonic() {
        let mut table = table();
        table.transition(0, StepStatus::Skipped, None).unwrap();

        let err = table.transition(0, StepStatus::Running, None).unwrap_err();
        assert_eq!(err.from, StepStatus::Skipped);
        assert_eq!(err.to, StepStatus::Running);
    }

    #[test]
    fn test_out_of_range_index() {
        let mut table = table();
        assert!(table.transition(7, StepStatus::Running, None).is_err());
    }
}
