//! Instrumented mock steps.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::context::ExecutionContext;
use crate::core::Mutation;
use crate::errors::StepError;
use crate::steps::Step;

/// A step whose probe reports satisfied once an apply has succeeded.
///
/// Models a well-behaved component: the live state it creates is what the
/// next probe sees.
#[derive(Debug)]
pub struct ConvergingStep {
    id: String,
    mutation: Mutation,
    satisfied: AtomicBool,
    applies: AtomicUsize,
    probes: AtomicUsize,
}

impl ConvergingStep {
    /// Creates an unsatisfied step.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mutation: Mutation::Local,
            satisfied: AtomicBool::new(false),
            applies: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        }
    }

    /// Sets the mutation class.
    #[must_use]
    pub const fn with_mutation(mut self, mutation: Mutation) -> Self {
        self.mutation = mutation;
        self
    }

    /// Number of apply calls.
    #[must_use]
    pub fn apply_count(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }

    /// Number of probe calls.
    #[must_use]
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Simulates drift: the desired state no longer holds.
    pub fn break_state(&self) {
        self.satisfied.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Step for ConvergingStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn mutation(&self) -> Mutation {
        self.mutation
    }

    async fn probe(&self, _ctx: &ExecutionContext) -> Result<bool, StepError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(self.satisfied.load(Ordering::SeqCst))
    }

    async fn apply(&self, _ctx: &ExecutionContext) -> Result<(), StepError> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        self.satisfied.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A converging step whose apply fails a fixed number of times first.
#[derive(Debug)]
pub struct FlakyStep {
    id: String,
    failures_left: AtomicUsize,
    satisfied: AtomicBool,
    applies: AtomicUsize,
    successes: AtomicUsize,
}

impl FlakyStep {
    /// Fails the first `failures` applies.
    #[must_use]
    pub fn new(id: impl Into<String>, failures: usize) -> Self {
        Self {
            id: id.into(),
            failures_left: AtomicUsize::new(failures),
            satisfied: AtomicBool::new(false),
            applies: AtomicUsize::new(0),
            successes: AtomicUsize::new(0),
        }
    }

    /// Never succeeds.
    #[must_use]
    pub fn always(id: impl Into<String>) -> Self {
        Self::new(id, usize::MAX)
    }

    /// Number of apply calls.
    #[must_use]
    pub fn apply_count(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }

    /// Number of applies that succeeded.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Step for FlakyStep {
    fn id(&self) -> &str {
        &self.id
    }

    async fn probe(&self, _ctx: &ExecutionContext) -> Result<bool, StepError> {
        Ok(self.satisfied.load(Ordering::SeqCst))
    }

    async fn apply(&self, _ctx: &ExecutionContext) -> Result<(), StepError> {
        self.applies.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StepError::apply(format!("{} failed on purpose", self.id)));
        }
        self.successes.fetch_add(1, Ordering::SeqCst);
        self.satisfied.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// One call observed by a [`RecordingStep`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    /// Step id.
    pub step: String,
    /// When the apply started.
    pub started: Instant,
    /// When the apply returned.
    pub finished: Instant,
}

/// Shared journal of apply calls.
pub type CallJournal = Arc<Mutex<Vec<CallRecord>>>;

/// A step that takes `delay` to apply and journals its start and end.
#[derive(Debug)]
pub struct RecordingStep {
    id: String,
    delay: Duration,
    journal: CallJournal,
}

impl RecordingStep {
    /// Creates a recording step.
    #[must_use]
    pub fn new(id: impl Into<String>, delay: Duration, journal: CallJournal) -> Self {
        Self {
            id: id.into(),
            delay,
            journal,
        }
    }

    /// Creates an empty journal.
    #[must_use]
    pub fn journal() -> CallJournal {
        Arc::new(Mutex::new(Vec::new()))
    }
}

#[async_trait]
impl Step for RecordingStep {
    fn id(&self) -> &str {
        &self.id
    }

    async fn apply(&self, _ctx: &ExecutionContext) -> Result<(), StepError> {
        let started = Instant::now();
        tokio::time::sleep(self.delay).await;
        self.journal.lock().push(CallRecord {
            step: self.id.clone(),
            started,
            finished: Instant::now(),
        });
        Ok(())
    }
}

/// A step whose apply never finishes on its own.
#[derive(Debug)]
pub struct HangingStep {
    id: String,
    started: AtomicBool,
}

impl HangingStep {
    /// Creates a hanging step.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            started: AtomicBool::new(false),
        }
    }

    /// Returns true once the apply has started.
    #[must_use]
    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Step for HangingStep {
    fn id(&self) -> &str {
        &self.id
    }

    async fn apply(&self, _ctx: &ExecutionContext) -> Result<(), StepError> {
        self.started.store(true, Ordering::SeqCst);
        std::future::pending::<()>().await;
        Ok(())
    }
}
