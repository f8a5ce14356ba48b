//! Event subscribers and the bus that fans events out to them.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use macrosim_types::RunId;

use crate::event::{CircuitEvent, EventEnvelope};

/// Receives every event the Circuit emits.
///
/// Implementations must return promptly: they run on the Circuit's thread
/// between phases.
pub trait EventSink: Send {
    /// Called once per emitted event, in emission order.
    fn on_event(&mut self, envelope: &EventEnvelope);
}

/// Discards every event.
pub struct NullSink;

impl EventSink for NullSink {
    fn on_event(&mut self, _envelope: &EventEnvelope) {}
}

/// Writes each event as a structured `tracing` record.
///
/// Lifecycle events log at `info`, per-period events at `debug`, agent
/// failures and aborts at `warn`.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_event(&mut self, envelope: &EventEnvelope) {
        let run = envelope.run;
        match &envelope.event {
            CircuitEvent::RunStarted {
                period,
                sectors,
                seed,
            } => {
                info!(%run, %period, ?sectors, seed, "Run started");
            }
            CircuitEvent::PeriodCompleted {
                period,
                metrics_recorded,
            } => {
                debug!(%run, %period, metrics_recorded, "Period completed");
            }
            CircuitEvent::PeriodAdvanced { period } => {
                debug!(%run, %period, "Period advanced");
            }
            CircuitEvent::AgentFailed {
                period,
                sector,
                agent,
                kind,
                reason,
            } => {
                warn!(%run, %period, sector, %agent, kind = kind.label(), reason, "Agent failed");
            }
            CircuitEvent::MarkerAdded { period, label } => {
                info!(%run, %period, label, "Marker added");
            }
            CircuitEvent::RunTerminated {
                period,
                periods_completed,
            } => {
                info!(%run, %period, periods_completed, "Run terminated");
            }
            CircuitEvent::RunAborted {
                period,
                sector,
                phase,
                cause,
            } => {
                warn!(%run, %period, ?sector, ?phase, cause, "Run aborted");
            }
        }
    }
}

/// Forwards events to a `tokio` broadcast channel.
///
/// Sending never blocks. A receiver that falls more than the channel
/// capacity behind gets `Lagged` and skips ahead; having no receivers at
/// all is not an error.
pub struct BroadcastSink {
    tx: broadcast::Sender<EventEnvelope>,
}

impl BroadcastSink {
    /// Create a sink and its channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn on_event(&mut self, envelope: &EventEnvelope) {
        // Err only means nobody is listening.
        let receivers = self.tx.send(envelope.clone()).unwrap_or(0);
        debug!(event = envelope.event.name(), receivers, "Event broadcast");
    }
}

/// Keeps every event in memory.
///
/// Clones share the same buffer, so a caller can keep one handle and give
/// the other to the bus.
#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<EventEnvelope>>>,
}

impl RecordingSink {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the events received so far.
    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for RecordingSink {
    fn on_event(&mut self, envelope: &EventEnvelope) {
        if let Ok(mut events) = self.events.lock() {
            events.push(envelope.clone());
        }
    }
}

/// Fans events out to the registered sinks.
pub struct EventBus {
    run: RunId,
    sequence: u64,
    sinks: Vec<Box<dyn EventSink>>,
}

impl EventBus {
    /// Create a bus with no sinks for `run`.
    pub const fn new(run: RunId) -> Self {
        Self {
            run,
            sequence: 0,
            sinks: Vec::new(),
        }
    }

    /// The run this bus stamps on its events.
    pub const fn run(&self) -> RunId {
        self.run
    }

    /// Number of registered sinks.
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    /// Whether no sink is registered.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    /// Register a sink. Sinks receive events in registration order.
    pub fn subscribe(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Stamp `event` and deliver it to every sink.
    pub fn emit(&mut self, event: CircuitEvent) {
        let envelope = EventEnvelope {
            run: self.run,
            sequence: self.sequence,
            emitted_at: Utc::now(),
            event,
        };
        self.sequence = self.sequence.saturating_add(1);
        for sink in &mut self.sinks {
            sink.on_event(&envelope);
        }
    }
}

impl core::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventBus")
            .field("run", &self.run)
            .field("sequence", &self.sequence)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}
