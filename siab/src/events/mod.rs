//! Event sink system for observability.
//!
//! The executor reports every status transition, probe warning and safety
//! check through an [`EventSink`]. Sinks never fail the run; errors inside a
//! sink are logged and dropped.

mod sink;

pub use sink::{CollectingEventSink, EventSink, FanoutEventSink, LoggingEventSink, NoOpEventSink};
