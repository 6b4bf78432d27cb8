//! Core domain model types for the orchestrator.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Step status, pipeline mode and mutation class enums
//! - Per-step records and transition events
//! - The status table that owns every record for one run

mod event;
mod record;
mod status;
mod table;

pub use event::{RunEvent, StepEvent};
pub use record::{FailureKind, StepRecord};
pub use status::{InstallMode, Mutation, StepStatus};
pub use table::{StatusTable, TransitionError};
