//! Edge routing: deciding what runs after a wave.
//!
//! After a wave merges, each completed node's router inspects the post-merge
//! snapshot and proposes either successor node ids or termination. The wave's
//! proposals are combined by union; a run ends only when every proposal is
//! terminal. Combined frontiers are deduplicated and kept in node-id order
//! so scheduling is deterministic.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::state::StateSnapshot;

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// A router's proposal for what follows a completed node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Dispatch these nodes in the next wave.
    To(Vec<String>),
    /// This branch of the run is finished.
    Terminal,
}

impl Transition {
    /// Convenience for a single successor.
    pub fn to(node: impl Into<String>) -> Self {
        Self::To(vec![node.into()])
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Chooses successors from the post-merge snapshot.
///
/// Routing is synchronous and read-only: routers look at state, they never
/// call out or mutate anything.
pub trait Router: Send + Sync {
    fn route(&self, snapshot: &StateSnapshot) -> Transition;
}

impl<F> Router for F
where
    F: Fn(&StateSnapshot) -> Transition + Send + Sync,
{
    fn route(&self, snapshot: &StateSnapshot) -> Transition {
        self(snapshot)
    }
}

/// Shared router handle as stored in the graph.
pub type BoxRouter = Arc<dyn Router>;

/// Router that always proposes the same successors (declarative edges).
pub struct StaticRouter {
    targets: Vec<String>,
}

impl StaticRouter {
    /// An empty target list is a terminal edge.
    pub fn new(targets: Vec<String>) -> Self {
        Self { targets }
    }
}

impl Router for StaticRouter {
    fn route(&self, _snapshot: &StateSnapshot) -> Transition {
        if self.targets.is_empty() {
            Transition::Terminal
        } else {
            Transition::To(self.targets.clone())
        }
    }
}

// ---------------------------------------------------------------------------
// combine
// ---------------------------------------------------------------------------

/// Fold one wave's proposals into the next frontier.
///
/// `Terminal` only wins unanimously: if any proposal names successors, the
/// run continues with the deduplicated union.
pub fn combine(transitions: &[Transition]) -> Transition {
    let mut union: BTreeSet<String> = BTreeSet::new();
    for transition in transitions {
        if let Transition::To(targets) = transition {
            union.extend(targets.iter().cloned());
        }
    }
    if union.is_empty() {
        Transition::Terminal
    } else {
        Transition::To(union.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
