//! Top-level install and uninstall drivers.
//!
//! Each driver wires preflight, channel detection, the guarded registry,
//! the executor and persistence together for one run. Outcomes map to
//! process exit codes through [`ExitStatus`].

use crate::collab::Collaborators;
use crate::components::{install_registry, uninstall_registry};
use crate::config::SiabConfig;
use crate::context::ExecutionContext;
use crate::core::InstallMode;
use crate::errors::SiabError;
use crate::events::{EventSink, FanoutEventSink, NoOpEventSink};
use crate::pipeline::{CancellationToken, Executor, RunObserver, RunResult, StepRegistry};
use crate::preflight::run_preflight;
use crate::safety::{ManagementChannel, SafetyGuard};
use crate::state::{ExecutionLogSink, StatusWriter};
use crate::teardown::{
    take_snapshot, ConfirmationPolicy, Confirmer, ResidualReport, ResidualScan, SnapshotPlan,
    SnapshotReport, TeardownTracker, UninstallPhase,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Process exit status of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Everything succeeded.
    Success,
    /// Bad configuration or usage.
    Usage,
    /// Host requirements unmet.
    Preflight,
    /// An install step failed and the run halted.
    InstallHalted,
    /// An uninstall finished with failed steps.
    UninstallIncomplete,
    /// A destructive action was not confirmed.
    NotConfirmed,
    /// The run was interrupted.
    Interrupted,
}

impl ExitStatus {
    /// Numeric exit code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Usage => 1,
            Self::Preflight => 2,
            Self::InstallHalted => 3,
            Self::UninstallIncomplete => 4,
            Self::NotConfirmed => 5,
            Self::Interrupted => 130,
        }
    }

    /// Status of a finished run.
    #[must_use]
    pub fn from_result(result: &RunResult) -> Self {
        if result.interrupted {
            Self::Interrupted
        } else if result.is_success() {
            Self::Success
        } else {
            match result.mode {
                InstallMode::Install => Self::InstallHalted,
                InstallMode::Uninstall => Self::UninstallIncomplete,
            }
        }
    }

    /// Status of a run that never started.
    #[must_use]
    pub const fn from_error(error: &SiabError) -> Self {
        match error {
            SiabError::Preflight(_) => Self::Preflight,
            SiabError::ConfirmationRequired(_) | SiabError::Aborted => Self::NotConfirmed,
            _ => Self::Usage,
        }
    }
}

/// Options of `install`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstallOptions {
    /// Skip the host resource checks.
    pub skip_preflight: bool,
}

/// Options of `uninstall`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UninstallOptions {
    /// How the run is confirmed.
    pub confirmation: ConfirmationPolicy,
    /// Take a snapshot before tearing down.
    pub snapshot: bool,
    /// Keep the data directory.
    pub keep_data: bool,
}

/// Everything an uninstall produced.
#[derive(Debug, Clone, Serialize)]
pub struct UninstallReport {
    /// The teardown run.
    pub result: RunResult,
    /// Snapshot, when one was requested.
    pub snapshot: Option<SnapshotReport>,
    /// Residual scan; absent when the run was interrupted.
    pub residuals: Option<ResidualReport>,
    /// Phase history.
    pub phases: TeardownTracker,
}

impl UninstallReport {
    /// Exit status of the uninstall. Residue is reported, not failed on.
    #[must_use]
    pub fn exit_status(&self) -> ExitStatus {
        ExitStatus::from_result(&self.result)
    }
}

/// Drives install and uninstall runs against one host.
pub struct Orchestrator {
    config: SiabConfig,
    collab: Collaborators,
    sink: Arc<dyn EventSink>,
    observers: Vec<Arc<dyn RunObserver>>,
    cancellation: Arc<CancellationToken>,
    ssh_connection: Option<String>,
    residual_scan: ResidualScan,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("domain", &self.config.domain)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(config: SiabConfig, collab: Collaborators) -> Self {
        let residual_scan = ResidualScan::for_config(&config);
        Self {
            config,
            collab,
            sink: Arc::new(NoOpEventSink),
            observers: Vec::new(),
            cancellation: Arc::new(CancellationToken::new()),
            ssh_connection: None,
            residual_scan,
        }
    }

    /// Adds an event sink; the execution log is always attached.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Adds a run observer such as a progress reporter.
    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Shares a cancellation token, typically tripped by Ctrl-C.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    /// Sets the session's `SSH_CONNECTION` value.
    #[must_use]
    pub fn with_ssh_connection(mut self, value: Option<String>) -> Self {
        self.ssh_connection = value;
        self
    }

    /// Overrides where the residual scan looks.
    #[must_use]
    pub fn with_residual_scan(mut self, scan: ResidualScan) -> Self {
        self.residual_scan = scan;
        self
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &SiabConfig {
        &self.config
    }

    async fn guard(&self) -> Arc<SafetyGuard> {
        let channel = ManagementChannel::detect(
            self.collab.runner.as_ref(),
            self.ssh_connection.as_deref(),
            self.config.management_port,
        )
        .await;
        Arc::new(SafetyGuard::for_channel(channel, self.collab.filter.clone()))
    }

    fn context(&self, mode: InstallMode) -> ExecutionContext {
        let mut fanout = FanoutEventSink::new().with(self.sink.clone());
        match ExecutionLogSink::open(&self.config.state_dir) {
            Ok(log) => fanout = fanout.with(Arc::new(log)),
            Err(e) => warn!(dir = %self.config.state_dir.display(), error = %e, "Execution log unavailable"),
        }
        ExecutionContext::new(mode, self.config.clone())
            .with_event_sink(Arc::new(fanout))
            .with_cancellation(self.cancellation.clone())
    }

    async fn execute(&self, registry: &StepRegistry) -> RunResult {
        let ctx = self.context(registry.mode());
        let mut executor = Executor::new().with_observer(Arc::new(StatusWriter::new(
            &self.config.state_dir,
            registry.mode(),
        )));
        for observer in &self.observers {
            executor = executor.with_observer(observer.clone());
        }
        executor.execute(registry, &ctx).await
    }

    /// Runs the install pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error only when the pipeline cannot start: unmet
    /// preflight requirements or a malformed registry. Step failures are
    /// in the returned [`RunResult`].
    pub async fn install(&self, options: InstallOptions) -> Result<RunResult, SiabError> {
        if options.skip_preflight {
            warn!("Preflight checks skipped");
        } else {
            run_preflight(self.collab.runner.as_ref(), &self.config.sizing, &self.config.data_dir).await?;
        }

        let guard = self.guard().await;
        let registry = install_registry(&self.config, &self.collab, &guard)?;
        info!(steps = registry.len(), domain = %self.config.domain, "Installing");
        Ok(self.execute(&registry).await)
    }

    /// Runs the uninstall lifecycle: confirmation, optional snapshot,
    /// teardown and the residual scan.
    ///
    /// # Errors
    ///
    /// Returns an error when confirmation is missing or declined, or when
    /// the registry is malformed. Step failures are in the report.
    pub async fn uninstall(
        &self,
        options: UninstallOptions,
        confirmer: &dyn Confirmer,
    ) -> Result<UninstallReport, SiabError> {
        let mut phases = TeardownTracker::new();
        advance(&mut phases, UninstallPhase::ConfirmationPending);
        options.confirmation.confirm(confirmer, "Uninstall").await?;

        let snapshot = if options.snapshot {
            let report = take_snapshot(&SnapshotPlan::for_config(&self.config), Utc::now()).await;
            advance(&mut phases, UninstallPhase::SnapshotTaken);
            Some(report)
        } else {
            advance(&mut phases, UninstallPhase::SnapshotSkipped);
            None
        };

        let guard = self.guard().await;
        let registry = uninstall_registry(&self.config, &self.collab, &guard, options.keep_data)?;
        advance(&mut phases, UninstallPhase::TearingDown);
        info!(steps = registry.len(), keep_data = options.keep_data, "Uninstalling");
        let result = self.execute(&registry).await;

        let residuals = if result.interrupted {
            None
        } else {
            advance(&mut phases, UninstallPhase::Verifying);
            let scan = if options.keep_data {
                self.residual_scan.clone().keeping(&self.config.data_dir)
            } else {
                self.residual_scan.clone()
            };
            let report = scan.run(self.collab.runner.as_ref()).await;
            advance(&mut phases, UninstallPhase::Done);
            Some(report)
        };

        Ok(UninstallReport {
            result,
            snapshot,
            residuals,
            phases,
        })
    }
}

fn advance(tracker: &mut TeardownTracker, next: UninstallPhase) {
    if let Err(e) = tracker.advance(next) {
        warn!(error = %e, "Unexpected uninstall phase order");
    }
}
