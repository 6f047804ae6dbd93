//! Event sinks for build observability.
//!
//! Sinks are passed explicitly to the components that emit events; there is
//! no process-wide sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
