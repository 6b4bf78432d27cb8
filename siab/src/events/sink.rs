//! Event sink trait and implementations.

use crate::core::{RunEvent, StepStatus};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, warn, Level};

/// Trait for sinks that receive run events.
///
/// Implementations must not panic and must not block for long; they are
/// called inline by the executor between steps.
pub trait EventSink: Send + Sync {
    /// Receives an event.
    fn emit(&self, event: &RunEvent);

    /// Flushes buffered output, if any.
    fn flush(&self) {}
}

/// A no-op event sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: &RunEvent) {}
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub const fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event: &RunEvent) {
        match event {
            RunEvent::Transition(t) if t.to == StepStatus::Failed => {
                warn!(
                    step = %t.step_id,
                    order = t.order,
                    from = %t.from,
                    message = t.message.as_deref().unwrap_or(""),
                    "Step failed"
                );
            }
            RunEvent::ProbeWarning { step_id, error } => {
                warn!(step = %step_id, error = %error, "Probe could not determine state; applying");
            }
            _ if self.level == Level::DEBUG => {
                debug!(event_type = event.name(), event_data = ?event, "Event: {}", event.name());
            }
            _ => {
                info!(event_type = event.name(), step = event.step_id().unwrap_or(""), "Event: {}", event.name());
            }
        }
    }
}

/// Forwards every event to several sinks in order.
#[derive(Default, Clone)]
pub struct FanoutEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutEventSink {
    /// Creates an empty fan-out.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a sink.
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Returns the number of sinks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Returns true if no sinks are attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl std::fmt::Debug for FanoutEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutEventSink")
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl EventSink for FanoutEventSink {
    fn emit(&self, event: &RunEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }

    fn flush(&self) {
        for sink in &self.sinks {
            sink.flush();
        }
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<RunEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns `(step, from, to)` for every transition, in order.
    #[must_use]
    pub fn transitions(&self) -> Vec<(String, StepStatus, StepStatus)> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match e {
                RunEvent::Transition(t) => Some((t.step_id.clone(), t.from, t.to)),
                _ => None,
            })
            .collect()
    }

    /// Returns events with the given dotted name.
    #[must_use]
    pub fn events_named(&self, name: &str) -> Vec<RunEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.name() == name)
            .cloned()
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: &RunEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StepEvent;
    use chrono::Utc;

    fn transition(step: &str, from: StepStatus, to: StepStatus) -> RunEvent {
        RunEvent::Transition(StepEvent {
            step_id: step.to_string(),
            order: 0,
            total: 1,
            from,
            to,
            message: None,
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn test_noop_sink() {
        NoOpEventSink.emit(&transition("a", StepStatus::Pending, StepStatus::Running));
    }

    #[test]
    fn test_logging_sink() {
        let sink = LoggingEventSink::default();
        sink.emit(&transition("a", StepStatus::Running, StepStatus::Failed));
        LoggingEventSink::debug().emit(&transition("a", StepStatus::Pending, StepStatus::Running));
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(&transition("a", StepStatus::Pending, StepStatus::Running));
        sink.emit(&RunEvent::ProbeWarning {
            step_id: "a".to_string(),
            error: "timeout".to_string(),
        });

        assert_eq!(sink.len(), 2);
        assert_eq!(
            sink.transitions(),
            vec![("a".to_string(), StepStatus::Pending, StepStatus::Running)]
        );
        assert_eq!(sink.events_named("step.probe_warning").len(), 1);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let first = Arc::new(CollectingEventSink::new());
        let second = Arc::new(CollectingEventSink::new());
        let fanout = FanoutEventSink::new()
            .with(first.clone())
            .with(second.clone());

        fanout.emit(&transition("a", StepStatus::Pending, StepStatus::Skipped));

        assert_eq!(fanout.len(), 2);
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }
}
