//! Collaborator seam for external calls.
//!
//! Anything a node reaches outside the process for (a model endpoint, an
//! HTTP API, a search index) sits behind this trait so handlers stay
//! testable and the engine can classify failures as transient or fatal.
//! The request/response payloads are plain JSON values; the contract of a
//! given collaborator is between it and the handlers that call it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

// ---------------------------------------------------------------------------
// CollaboratorError
// ---------------------------------------------------------------------------

/// Failure of an external call.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    /// The call may succeed if repeated (rate limit, timeout, 5xx).
    #[error("transient external failure: {0}")]
    Transient(String),

    /// The call is rejected for cause and will not succeed on retry.
    #[error("fatal external failure: {0}")]
    Fatal(String),
}

// ---------------------------------------------------------------------------
// Collaborator
// ---------------------------------------------------------------------------

/// An external dependency a handler can invoke by name.
///
/// Uses native async fn in traits (RPITIT); `BoxCollaborator` is the
/// object-safe wrapper stored in the run context.
pub trait Collaborator: Send + Sync {
    /// Short identifier, used in logs and events.
    fn name(&self) -> &str;

    fn invoke(&self, request: Value)
        -> impl Future<Output = Result<Value, CollaboratorError>> + Send;
}

/// Object-safe version of [`Collaborator`] with boxed futures.
pub trait CollaboratorDyn: Send + Sync {
    fn name(&self) -> &str;

    fn invoke_boxed(
        &self,
        request: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, CollaboratorError>> + Send + '_>>;
}

impl<T: Collaborator> CollaboratorDyn for T {
    fn name(&self) -> &str {
        Collaborator::name(self)
    }

    fn invoke_boxed(
        &self,
        request: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value, CollaboratorError>> + Send + '_>> {
        Box::pin(self.invoke(request))
    }
}

/// Type-erased collaborator handle, shareable across node tasks.
#[derive(Clone)]
pub struct BoxCollaborator {
    inner: Arc<dyn CollaboratorDyn>,
}

impl BoxCollaborator {
    pub fn new<T: Collaborator + 'static>(collaborator: T) -> Self {
        Self {
            inner: Arc::new(collaborator),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub async fn invoke(&self, request: Value) -> Result<Value, CollaboratorError> {
        self.inner.invoke_boxed(request).await
    }
}

impl std::fmt::Debug for BoxCollaborator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("BoxCollaborator").field(&self.name()).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    impl Collaborator for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn invoke(&self, request: Value) -> Result<Value, CollaboratorError> {
            Ok(json!({ "echo": request }))
        }
    }

    #[tokio::test]
    async fn boxed_collaborator_delegates() {
        let boxed = BoxCollaborator::new(Echo);
        assert_eq!(boxed.name(), "echo");
        let reply = boxed.invoke(json!("hi")).await.unwrap();
        assert_eq!(reply, json!({ "echo": "hi" }));
    }
}
