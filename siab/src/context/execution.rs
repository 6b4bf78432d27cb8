//! Immutable execution context.

use super::RunIdentity;
use crate::config::SiabConfig;
use crate::core::{InstallMode, RunEvent};
use crate::events::{EventSink, NoOpEventSink};
use crate::pipeline::CancellationToken;
use std::sync::Arc;

/// Configuration and log sink for one run, shared read-only with every step.
///
/// Built once before the executor starts. Cloning is cheap; all clones see
/// the same sink and cancellation token.
#[derive(Clone)]
pub struct ExecutionContext {
    run: RunIdentity,
    config: Arc<SiabConfig>,
    sink: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
}

impl ExecutionContext {
    /// Creates a context for `mode` with the given configuration.
    #[must_use]
    pub fn new(mode: InstallMode, config: SiabConfig) -> Self {
        Self {
            run: RunIdentity::new(mode),
            config: Arc::new(config),
            sink: Arc::new(NoOpEventSink),
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Shares an existing cancellation token (e.g. one wired to Ctrl-C).
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// Returns the run identity.
    #[must_use]
    pub const fn run(&self) -> &RunIdentity {
        &self.run
    }

    /// Returns the pipeline mode.
    #[must_use]
    pub const fn mode(&self) -> InstallMode {
        self.run.mode
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &SiabConfig {
        &self.config
    }

    /// Returns the target domain.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.config.domain
    }

    /// Looks up a named environment override.
    #[must_use]
    pub fn env_override(&self, key: &str) -> Option<&str> {
        self.config.env_overrides.get(key).map(String::as_str)
    }

    /// Returns the event sink.
    #[must_use]
    pub fn sink(&self) -> &Arc<dyn EventSink> {
        &self.sink
    }

    /// Emits an event to the sink.
    pub fn emit(&self, event: &RunEvent) {
        self.sink.emit(event);
    }

    /// Returns the cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &Arc<CancellationToken> {
        &self.cancel
    }

    /// Returns true once an interrupt has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("run", &self.run)
            .field("domain", &self.config.domain)
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}
