//! # SIAB
//!
//! Idempotent, resumable install and uninstall orchestration for a
//! single-host Kubernetes platform.
//!
//! An install is an ordered registry of steps. Each step pairs a read-only
//! probe with a mutating apply and an optional post-condition check:
//!
//! - **Probe before apply**: a step whose desired state already holds is
//!   skipped, so a rerun after a failure repeats only what is missing
//! - **Strict ordering**: step N+1 never starts before step N is terminal
//! - **Safety guard**: steps that can sever the operator's SSH session run
//!   between keep-alive assertions on the packet filter
//! - **Continue-on-error teardown**: uninstall attempts every step
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use siab::prelude::*;
//!
//! let config = ConfigLoader::new().load()?;
//! let collab = Collaborators::system(config.timeouts.ready());
//! let orchestrator = Orchestrator::new(config, collab)
//!     .with_observer(Arc::new(ProgressReporter::stdout(false)));
//!
//! let result = orchestrator.install(InstallOptions::default()).await?;
//! std::process::exit(ExitStatus::from_result(&result).code().into());
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, missing_docs, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod collab;
pub mod components;
pub mod config;
pub mod context;
pub mod core;
pub mod errors;
pub mod events;
pub mod orchestrator;
pub mod pipeline;
pub mod preflight;
pub mod progress;
pub mod safety;
pub mod state;
pub mod steps;
pub mod teardown;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::collab::{
        ClusterClient, Collaborators, CommandRunner, CommandSpec, DesiredState, PacketFilter,
        ReadyState, ResourceRef, Selector,
    };
    pub use crate::config::{ConfigLoader, SiabConfig};
    pub use crate::context::{ExecutionContext, RunIdentity};
    pub use crate::core::{FailureKind, InstallMode, Mutation, StepRecord, StepStatus};
    pub use crate::errors::{SiabError, StepError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::orchestrator::{
        ExitStatus, InstallOptions, Orchestrator, UninstallOptions, UninstallReport,
    };
    pub use crate::pipeline::{
        CancellationToken, Executor, RegistryBuilder, RunObserver, RunResult, StepRegistry,
    };
    pub use crate::progress::{ProgressReporter, RenderMode};
    pub use crate::safety::{ManagementChannel, SafetyGuard};
    pub use crate::steps::{with_safety_guard, FnStep, Step};
    pub use crate::teardown::{ConfirmationPolicy, Confirmer, TerminalConfirmer};
}
