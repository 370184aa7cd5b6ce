//! Structured run events emitted to the observability sink.
//!
//! `RunEvent` is the unified event type for a run: one event per node attempt
//! and one per wave transition, plus run lifecycle markers. All variants are
//! Clone + Send + Sync for use with tokio broadcast channels.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The terminal disposition of a single node attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The attempt produced a schema-valid output.
    Succeeded,
    /// The attempt failed but will be retried.
    Retrying,
    /// The attempt failed and the node is terminally failed.
    Failed,
    /// The attempt observed the cancellation signal.
    Cancelled,
}

/// Events emitted during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    /// A run has started executing.
    RunStarted { run_id: Uuid, graph: String },

    /// A wave of nodes is being dispatched.
    WaveStarted {
        run_id: Uuid,
        wave: u32,
        node_ids: Vec<String>,
    },

    /// One node attempt reached a terminal per-attempt outcome.
    NodeAttempt {
        run_id: Uuid,
        wave: u32,
        node_id: String,
        /// 1-based attempt number.
        attempt: u32,
        duration_ms: u64,
        outcome: AttemptOutcome,
        /// Free-form attributes (error text, validation detail, ...).
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attributes: BTreeMap<String, Value>,
    },

    /// A wave settled and its outputs were merged.
    WaveMerged {
        run_id: Uuid,
        wave: u32,
        merged_fields: Vec<String>,
    },

    /// The run reached the terminal signal.
    RunCompleted { run_id: Uuid, waves: u32 },

    /// The run failed with a fatal error.
    RunFailed {
        run_id: Uuid,
        waves: u32,
        error: String,
    },

    /// The run observed cancellation and aborted.
    RunAborted { run_id: Uuid, waves: u32 },
}

impl RunEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::WaveStarted { run_id, .. }
            | RunEvent::NodeAttempt { run_id, .. }
            | RunEvent::WaveMerged { run_id, .. }
            | RunEvent::RunCompleted { run_id, .. }
            | RunEvent::RunFailed { run_id, .. }
            | RunEvent::RunAborted { run_id, .. } => *run_id,
        }
    }
}
