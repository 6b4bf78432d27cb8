//! Testing utilities.
//!
//! This module provides:
//! - An in-memory host implementing every collaborator trait
//! - Instrumented mock steps for the executor property suite
//! - Context fixtures

mod host;
mod mocks;

pub use host::FakeHost;
pub use mocks::{CallJournal, CallRecord, ConvergingStep, FlakyStep, HangingStep, RecordingStep};

use crate::config::SiabConfig;
use crate::context::ExecutionContext;
use crate::core::InstallMode;
use std::path::Path;

/// Configuration rooted in a scratch directory, with short timeouts.
#[must_use]
pub fn test_config(root: &Path) -> SiabConfig {
    let mut config = SiabConfig::default()
        .with_domain("siab.test")
        .with_state_dir(root.join("state"));
    config.data_dir = root.join("data");
    config.timeouts.ready_secs = 2;
    config.timeouts.delete_secs = 2;
    config.timeouts.probe_secs = 2;
    config.timeouts.poll_interval_secs = 1;
    config
}

/// Context for `mode` over [`test_config`].
#[must_use]
pub fn test_context(mode: InstallMode, root: &Path) -> ExecutionContext {
    ExecutionContext::new(mode, test_config(root))
}
