//! Node work-function contract.
//!
//! A node is a pure-ish async function over an immutable snapshot: it reads
//! its declared fields, does its work (usually through a collaborator), and
//! returns a `PartialOutput`. It never mutates state directly.
//!
//! `NodeHandler` uses native async fn in traits (RPITIT, Rust 2024 edition);
//! `BoxNodeHandler` is the object-safe wrapper the graph stores, using the
//! same blanket-impl pattern as `BoxCollaborator`:
//! 1. Define an object-safe `NodeHandlerDyn` trait with boxed futures
//! 2. Blanket-impl `NodeHandlerDyn` for all `T: NodeHandler`
//! 3. `BoxNodeHandler` wraps `Arc<dyn NodeHandlerDyn>` and delegates

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use thiserror::Error;

use crate::collaborator::CollaboratorError;
use crate::context::RunContext;
use crate::state::StateSnapshot;

pub use crate::state::PartialOutput;

// ---------------------------------------------------------------------------
// NodeError
// ---------------------------------------------------------------------------

/// Failure of a single node attempt.
///
/// The transient/fatal split drives the retry loop: transient failures are
/// retried within the node's attempt budget, fatal ones end the node at once.
#[derive(Debug, Clone, Error)]
pub enum NodeError {
    /// Worth retrying (rate limit, timeout, flaky upstream).
    #[error("transient node failure: {0}")]
    Transient(String),

    /// Retrying cannot help (bad input, unrecoverable upstream rejection).
    #[error("fatal node failure: {0}")]
    Fatal(String),
}

impl NodeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<CollaboratorError> for NodeError {
    fn from(err: CollaboratorError) -> Self {
        match err {
            CollaboratorError::Transient(msg) => Self::Transient(msg),
            CollaboratorError::Fatal(msg) => Self::Fatal(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Attempt
// ---------------------------------------------------------------------------

/// Which attempt this is, and the corrective hint from the previous one.
///
/// The hint is `None` on the first attempt and on retries whose policy is
/// plain rerun; it carries the rendered validation problems when the policy
/// asks for corrective feedback.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub number: u32,
    pub max_attempts: u32,
    hint: Option<String>,
}

impl Attempt {
    pub fn first(max_attempts: u32) -> Self {
        Self {
            number: 1,
            max_attempts,
            hint: None,
        }
    }

    pub fn retry(number: u32, max_attempts: u32, hint: Option<String>) -> Self {
        Self {
            number,
            max_attempts,
            hint,
        }
    }

    /// Corrective feedback from the previous rejected attempt, if any.
    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn is_retry(&self) -> bool {
        self.number > 1
    }

    pub fn is_last(&self) -> bool {
        self.number >= self.max_attempts
    }
}

// ---------------------------------------------------------------------------
// NodeHandler
// ---------------------------------------------------------------------------

/// The work function of a node.
///
/// Handlers receive an immutable snapshot and must confine themselves to
/// the fields their `NodeSpec` declares; the validator rejects anything
/// written outside the declared set.
pub trait NodeHandler: Send + Sync {
    fn run(
        &self,
        snapshot: StateSnapshot,
        attempt: Attempt,
        ctx: RunContext,
    ) -> impl Future<Output = Result<PartialOutput, NodeError>> + Send;
}

/// Object-safe version of [`NodeHandler`] with boxed futures.
///
/// Exists solely to enable dynamic dispatch; a blanket implementation
/// covers every `NodeHandler`.
pub trait NodeHandlerDyn: Send + Sync {
    fn run_boxed(
        &self,
        snapshot: StateSnapshot,
        attempt: Attempt,
        ctx: RunContext,
    ) -> Pin<Box<dyn Future<Output = Result<PartialOutput, NodeError>> + Send + '_>>;
}

impl<T: NodeHandler> NodeHandlerDyn for T {
    fn run_boxed(
        &self,
        snapshot: StateSnapshot,
        attempt: Attempt,
        ctx: RunContext,
    ) -> Pin<Box<dyn Future<Output = Result<PartialOutput, NodeError>> + Send + '_>> {
        Box::pin(self.run(snapshot, attempt, ctx))
    }
}

/// Type-erased node handler as stored in the graph.
///
/// `Arc`-backed so a handler can be shared with every spawned attempt task.
#[derive(Clone)]
pub struct BoxNodeHandler {
    inner: Arc<dyn NodeHandlerDyn>,
}

impl BoxNodeHandler {
    /// Wrap a concrete `NodeHandler` in a type-erased, shareable handle.
    pub fn new<T: NodeHandler + 'static>(handler: T) -> Self {
        Self {
            inner: Arc::new(handler),
        }
    }

    pub async fn run(
        &self,
        snapshot: StateSnapshot,
        attempt: Attempt,
        ctx: RunContext,
    ) -> Result<PartialOutput, NodeError> {
        self.inner.run_boxed(snapshot, attempt, ctx).await
    }
}

impl std::fmt::Debug for BoxNodeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BoxNodeHandler")
    }
}

// ---------------------------------------------------------------------------
// Closure handlers
// ---------------------------------------------------------------------------

struct FnHandler<F>(F);

impl<F, Fut> NodeHandler for FnHandler<F>
where
    F: Fn(StateSnapshot, Attempt, RunContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<PartialOutput, NodeError>> + Send,
{
    fn run(
        &self,
        snapshot: StateSnapshot,
        attempt: Attempt,
        ctx: RunContext,
    ) -> impl Future<Output = Result<PartialOutput, NodeError>> + Send {
        (self.0)(snapshot, attempt, ctx)
    }
}

/// Build a handler from an async closure.
pub fn handler_fn<F, Fut>(f: F) -> BoxNodeHandler
where
    F: Fn(StateSnapshot, Attempt, RunContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<PartialOutput, NodeError>> + Send + 'static,
{
    BoxNodeHandler::new(FnHandler(f))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
