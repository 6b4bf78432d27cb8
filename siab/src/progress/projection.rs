//! `(statuses) -> (completed, total)` projection.

use crate::core::{StepRecord, StepStatus};
use serde::Serialize;

/// Where a run stands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// Steps in a terminal status.
    pub completed: usize,
    /// Registry size.
    pub total: usize,
    /// Failed steps.
    pub failed: usize,
    /// The step currently running.
    pub current: Option<String>,
}

impl Progress {
    /// Projects the status table.
    #[must_use]
    pub fn from_records(records: &[StepRecord]) -> Self {
        Self {
            completed: records.iter().filter(|r| r.status.is_terminal()).count(),
            total: records.len(),
            failed: records.iter().filter(|r| r.status == StepStatus::Failed).count(),
            current: records
                .iter()
                .find(|r| r.status == StepStatus::Running)
                .map(|r| r.id.clone()),
        }
    }

    /// Whole percentage complete; an empty registry is complete.
    #[must_use]
    pub fn percent(&self) -> usize {
        if self.total == 0 {
            100
        } else {
            self.completed * 100 / self.total
        }
    }

    /// A `[####----]` bar exactly `width` characters wide, brackets
    /// included.
    #[must_use]
    pub fn bar(&self, width: usize) -> String {
        let inner = width.saturating_sub(2);
        let filled = if self.total == 0 {
            inner
        } else {
            inner * self.completed / self.total
        };
        format!("[{}{}]", "#".repeat(filled), "-".repeat(inner - filled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Mutation;
    use pretty_assertions::assert_eq;

    fn records(statuses: &[StepStatus]) -> Vec<StepRecord> {
        statuses
            .iter()
            .enumerate()
            .map(|(i, status)| {
                let mut record = StepRecord::pending(format!("s{i}"), i, "", Mutation::Local);
                record.status = *status;
                record
            })
            .collect()
    }

    #[test]
    fn test_projection() {
        let progress = Progress::from_records(&records(&[
            StepStatus::Done,
            StepStatus::Skipped,
            StepStatus::Failed,
            StepStatus::Running,
        ]));
        assert_eq!(progress.completed, 3);
        assert_eq!(progress.total, 4);
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.current.as_deref(), Some("s3"));
        assert_eq!(progress.percent(), 75);
        assert_eq!(progress.bar(10), "[######--]");
    }

    #[test]
    fn test_empty_registry_is_complete() {
        let progress = Progress::from_records(&[]);
        assert_eq!(progress.percent(), 100);
        assert_eq!(progress.bar(4), "[##]");
    }
}
