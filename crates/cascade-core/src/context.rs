//! Per-run context handed to every node attempt.
//!
//! `RunContext` bundles the run id, the cancellation token, the event sink,
//! and the named collaborators. It is immutable and cheap to clone; one
//! clone travels with every spawned attempt task.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use cascade_types::event::RunEvent;

use crate::collaborator::BoxCollaborator;
use crate::sink::{EventSink, NullSink};

#[derive(Clone)]
pub struct RunContext {
    run_id: Uuid,
    cancel: CancellationToken,
    sink: Arc<dyn EventSink>,
    collaborators: Arc<BTreeMap<String, BoxCollaborator>>,
}

impl RunContext {
    pub(crate) fn new(
        run_id: Uuid,
        cancel: CancellationToken,
        sink: Arc<dyn EventSink>,
        collaborators: Arc<BTreeMap<String, BoxCollaborator>>,
    ) -> Self {
        Self {
            run_id,
            cancel,
            sink,
            collaborators,
        }
    }

    /// Minimal context with a null sink and no collaborators, for exercising
    /// a handler outside the executor.
    pub fn bare() -> Self {
        Self {
            run_id: Uuid::now_v7(),
            cancel: CancellationToken::new(),
            sink: Arc::new(NullSink),
            collaborators: Arc::new(BTreeMap::new()),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Look up a collaborator registered under `name`.
    pub fn collaborator(&self, name: &str) -> Option<&BoxCollaborator> {
        self.collaborators.get(name)
    }

    /// Whether the run has been asked to stop. Long-running handlers should
    /// poll this and bail out early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the run is cancelled, for use in `tokio::select!`.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub(crate) fn emit(&self, event: RunEvent) {
        self.sink.emit(&event);
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("collaborators", &self.collaborators.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
