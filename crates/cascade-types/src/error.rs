//! Graph construction errors.
//!
//! `BuildError` covers every structural defect detectable before a run
//! starts. Build errors are always fatal and never retried.

use thiserror::Error;

/// Errors raised while building or validating a graph.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The declared entry node id is not registered.
    #[error("entry node '{0}' does not exist")]
    MissingEntry(String),

    /// Two nodes were registered under the same id.
    #[error("duplicate node id: '{0}'")]
    DuplicateNode(String),

    /// A node, edge, or schema references a field that was never declared.
    #[error("node '{node}' references undeclared field '{field}'")]
    UnknownField { node: String, field: String },

    /// An edge or router targets a node id that does not exist.
    #[error("edge from '{from}' targets unknown node '{to}'")]
    DanglingEdge { from: String, to: String },

    /// Two nodes write the same non-append field.
    #[error(
        "nodes '{first}' and '{second}' both write field '{field}' whose merge policy is not append"
    )]
    ConflictingWriters {
        field: String,
        first: String,
        second: String,
    },

    /// A node's output schema declares a field outside its writes set.
    #[error("node '{node}' schema declares field '{field}' outside its writes set")]
    SchemaOutsideWrites { node: String, field: String },

    /// A field was declared twice.
    #[error("duplicate field declaration: '{0}'")]
    DuplicateField(String),

    /// The graph has no nodes.
    #[error("graph must have at least one node")]
    Empty,

    /// A config bound is out of range.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}
