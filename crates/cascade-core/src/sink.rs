//! Event sinks: where run lifecycle events go.
//!
//! The executor emits a `RunEvent` at every lifecycle step and never waits
//! on the sink; emission is fire-and-forget by contract. `TracingSink`
//! turns events into structured log records, `EventBus` fans them out to
//! broadcast subscribers, and `MemorySink` collects them for assertions.

use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::{info, warn};

use cascade_types::event::{AttemptOutcome, RunEvent};

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Receives run lifecycle events.
///
/// Implementations must be non-blocking; a slow or failing sink must never
/// stall or fail the run.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &RunEvent);
}

/// Discards every event.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &RunEvent) {}
}

// ---------------------------------------------------------------------------
// TracingSink
// ---------------------------------------------------------------------------

/// Logs every event as a structured tracing record.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &RunEvent) {
        match event {
            RunEvent::RunStarted { run_id, graph } => {
                info!(run_id = %run_id, graph = %graph, "run started");
            }
            RunEvent::WaveStarted { run_id, wave, node_ids } => {
                info!(run_id = %run_id, wave, nodes = ?node_ids, "wave started");
            }
            RunEvent::NodeAttempt {
                run_id,
                wave,
                node_id,
                attempt,
                duration_ms,
                outcome,
                ..
            } => match outcome {
                AttemptOutcome::Succeeded => {
                    info!(run_id = %run_id, wave, node_id = %node_id, attempt, duration_ms, "node attempt succeeded");
                }
                AttemptOutcome::Retrying => {
                    warn!(run_id = %run_id, wave, node_id = %node_id, attempt, duration_ms, "node attempt failed, retrying");
                }
                AttemptOutcome::Failed => {
                    warn!(run_id = %run_id, wave, node_id = %node_id, attempt, duration_ms, "node failed");
                }
                AttemptOutcome::Cancelled => {
                    info!(run_id = %run_id, wave, node_id = %node_id, attempt, "node cancelled");
                }
            },
            RunEvent::WaveMerged { run_id, wave, merged_fields } => {
                info!(run_id = %run_id, wave, fields = ?merged_fields, "wave merged");
            }
            RunEvent::RunCompleted { run_id, waves } => {
                info!(run_id = %run_id, waves, "run completed");
            }
            RunEvent::RunFailed { run_id, waves, error } => {
                warn!(run_id = %run_id, waves, error = %error, "run failed");
            }
            RunEvent::RunAborted { run_id, waves } => {
                info!(run_id = %run_id, waves, "run aborted");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Multi-consumer bus for run events.
///
/// Wraps a `tokio::sync::broadcast` channel. Cloning the bus clones the
/// sender, allowing multiple producers and consumers. Publishing with no
/// active subscribers is a no-op.
pub struct EventBus {
    sender: broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventSink for EventBus {
    fn emit(&self, event: &RunEvent) {
        // No subscribers means the event is silently dropped.
        let _ = self.sender.send(event.clone());
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// MemorySink
// ---------------------------------------------------------------------------

/// Collects events in memory, primarily for tests.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<RunEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &RunEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
