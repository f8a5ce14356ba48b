//! Lifecycle notifications emitted by the macrosim Circuit.
//!
//! The Circuit publishes a [`CircuitEvent`] at every lifecycle step (run
//! start, period advance, agent failure, marker, termination, abort) into
//! an [`EventBus`]. Observers register an [`EventSink`]; the Circuit does
//! not depend on whether any sink is attached, and delivery never blocks
//! the tick loop.
//!
//! Stock sinks:
//!
//! - [`TracingSink`] -- writes each event as a structured `tracing` record.
//! - [`BroadcastSink`] -- forwards events to a `tokio` broadcast channel.
//! - [`RecordingSink`] -- keeps events in memory (tests, report builders).
//! - [`NullSink`] -- discards everything.

pub mod event;
pub mod sink;

pub use event::{CircuitEvent, EventEnvelope};
pub use sink::{BroadcastSink, EventBus, EventSink, NullSink, RecordingSink, TracingSink};
