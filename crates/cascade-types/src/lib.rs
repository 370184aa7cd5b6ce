//! Shared domain types for the Cascade workflow engine.
//!
//! This crate contains the declarative side of the engine: field and merge
//! policy specs, node and graph specs, retry policy, run status, run events,
//! and graph construction errors.
//!
//! Zero infrastructure dependencies -- only serde, uuid, thiserror.

pub mod error;
pub mod event;
pub mod field;
pub mod graph;
pub mod status;
