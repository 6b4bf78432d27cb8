//! Sequential step executor.
//!
//! Executes a registry in order. For each step the probe decides between
//! `Skipped` and `Running`; a running step ends `Done` or `Failed`. Install
//! runs halt at the first failure, uninstall runs record it and move on.
//! Nothing is persisted between runs: a rerun re-probes the live system.

use super::{
    bounded, CancellationToken, FailureCollector, FailureMode, FailureRecord, StepRegistry,
};
use crate::context::{ExecutionContext, RunIdentity};
use crate::core::{
    FailureKind, InstallMode, RunEvent, StatusTable, StepEvent, StepRecord, StepStatus,
};
use crate::errors::StepError;
use crate::steps::Step;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Observer notified with the full status table after every transition.
///
/// Observers are projections: they must not influence execution.
pub trait RunObserver: Send + Sync {
    /// Called after every status transition.
    fn on_update(&self, run: &RunIdentity, records: &[StepRecord], event: &StepEvent);

    /// Called once after the last step.
    fn on_finish(&self, _result: &RunResult) {}
}

/// Result of executing a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    /// Run identity.
    pub run: RunIdentity,
    /// Pipeline mode.
    pub mode: InstallMode,
    /// Final status of every step, in registry order.
    pub records: Vec<StepRecord>,
    /// Failures in the order they happened.
    pub failures: Vec<FailureRecord>,
    /// The step an install halted at.
    pub halted_at: Option<String>,
    /// Whether the run was interrupted.
    pub interrupted: bool,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution finished.
    pub finished_at: DateTime<Utc>,
}

impl RunResult {
    /// Returns true if no step failed and the run was not interrupted.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && !self.interrupted
    }

    /// Number of steps whose apply ran to completion.
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.count(StepStatus::Done)
    }

    /// Number of steps found already satisfied.
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.count(StepStatus::Skipped)
    }

    /// Number of failed steps.
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.count(StepStatus::Failed)
    }

    /// Number of steps that reached a terminal status.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.records.iter().filter(|r| r.status.is_terminal()).count()
    }

    /// Registry size.
    #[must_use]
    pub fn total(&self) -> usize {
        self.records.len()
    }

    /// Looks up the record for a step.
    #[must_use]
    pub fn record(&self, id: &str) -> Option<&StepRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    fn count(&self, status: StepStatus) -> usize {
        self.records.iter().filter(|r| r.status == status).count()
    }
}

/// Executes step registries.
#[derive(Default, Clone)]
pub struct Executor {
    observers: Vec<Arc<dyn RunObserver>>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Executor {
    /// Creates an executor with no observers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an observer.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Executes every step of `registry` in order.
    ///
    /// Never returns an error: every failure is attached to its step and
    /// reflected in the returned [`RunResult`].
    pub async fn execute(&self, registry: &StepRegistry, ctx: &ExecutionContext) -> RunResult {
        let run = ctx.run().clone();
        let span = info_span!("run", run_id = %run.short_id(), mode = %registry.mode());
        self.execute_inner(registry, ctx, run).instrument(span).await
    }

    async fn execute_inner(
        &self,
        registry: &StepRegistry,
        ctx: &ExecutionContext,
        run: RunIdentity,
    ) -> RunResult {
        let mode = registry.mode();
        let started_at = Utc::now();
        let mut table = StatusTable::new(registry.pending_records());
        let mut failures = FailureCollector::new(FailureMode::for_mode(mode));
        let mut halted_at = None;

        info!(registry = registry.name(), steps = registry.len(), "Starting run");
        ctx.emit(&RunEvent::RunStarted {
            run_id: run.run_id.to_string(),
            mode,
            total: registry.len(),
        });

        for (index, step) in registry.steps().iter().enumerate() {
            if ctx.is_cancelled() || failures.should_stop() {
                break;
            }

            match self.probe(step.as_ref(), ctx).await {
                Ok(true) => {
                    info!(step = step.id(), "Already satisfied");
                    self.advance(&mut table, &run, ctx, index, StepStatus::Skipped, Some("already satisfied".to_string()));
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    warn!(step = step.id(), error = %e, "Probe could not determine state; applying");
                    table.set_probe_error(index, e.to_string());
                    ctx.emit(&RunEvent::ProbeWarning {
                        step_id: step.id().to_string(),
                        error: e.to_string(),
                    });
                }
            }

            if ctx.is_cancelled() {
                break;
            }

            self.advance(&mut table, &run, ctx, index, StepStatus::Running, None);
            info!(step = step.id(), "Applying");

            match apply_and_verify(step.as_ref(), ctx, ctx.cancellation()).await {
                Ok(()) => {
                    self.advance(&mut table, &run, ctx, index, StepStatus::Done, None);
                }
                Err((err, during_verify)) => {
                    let kind = err.failure_kind(during_verify);
                    let message = err.to_string();
                    error!(step = step.id(), kind = %kind, error = %message, "Step failed");

                    table.set_failure(index, kind);
                    self.advance(&mut table, &run, ctx, index, StepStatus::Failed, Some(message.clone()));
                    failures.record(FailureRecord::new(step.id(), kind, message));

                    if mode == InstallMode::Install && kind != FailureKind::Interrupted {
                        halted_at = Some(step.id().to_string());
                    }
                }
            }
        }

        let interrupted = ctx.is_cancelled();
        let result = RunResult {
            run: run.clone(),
            mode,
            records: table.into_records(),
            failures: failures.into_failures(),
            halted_at,
            interrupted,
            started_at,
            finished_at: Utc::now(),
        };

        ctx.emit(&RunEvent::RunFinished {
            run_id: run.run_id.to_string(),
            completed: result.completed(),
            failed: result.failed_count(),
            interrupted,
        });
        ctx.sink().flush();

        info!(
            applied = result.applied_count(),
            skipped = result.skipped_count(),
            failed = result.failed_count(),
            interrupted,
            "Run finished"
        );

        for observer in &self.observers {
            observer.on_finish(&result);
        }

        result
    }

    async fn probe(&self, step: &dyn Step, ctx: &ExecutionContext) -> Result<bool, StepError> {
        let limit = ctx.config().timeouts.probe();
        let what = format!("probe of {}", step.id());
        let satisfied = bounded(limit, &what, step.probe(ctx)).await;
        debug!(step = step.id(), ?satisfied, "Probed");
        satisfied
    }

    fn advance(
        &self,
        table: &mut StatusTable,
        run: &RunIdentity,
        ctx: &ExecutionContext,
        index: usize,
        to: StepStatus,
        message: Option<String>,
    ) {
        match table.transition(index, to, message) {
            Ok(event) => {
                ctx.emit(&RunEvent::Transition(event.clone()));
                for observer in &self.observers {
                    observer.on_update(run, table.records(), &event);
                }
            }
            Err(e) => error!(error = %e, "Rejected status transition"),
        }
    }
}

/// Runs apply then verify, racing both against cancellation.
///
/// The flag in the error reports whether the failure came from verify.
async fn apply_and_verify(
    step: &dyn Step,
    ctx: &ExecutionContext,
    cancel: &Arc<CancellationToken>,
) -> Result<(), (StepError, bool)> {
    let work = async {
        step.apply(ctx).await.map_err(|e| (e, false))?;
        step.verify(ctx).await.map_err(|e| (e, true))
    };

    tokio::select! {
        biased;
        () = cancel.cancelled() => Err((StepError::Interrupted, false)),
        result = work => result,
    }
}
