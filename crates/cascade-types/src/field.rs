//! State field declarations: value kinds and merge policies.
//!
//! Every field a run's state can hold is declared up front as a `FieldSpec`.
//! The merge policy is fixed at graph-build time and governs how a node's
//! partial output is combined into the shared state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// ValueKind
// ---------------------------------------------------------------------------

/// The declared kind of a state field's value.
///
/// Values are carried as `serde_json::Value`; the kind is checked when a
/// node's output is validated and when the initial snapshot is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    String,
    Number,
    Bool,
    Object,
    Array,
    /// Any JSON value is accepted.
    Any,
}

impl ValueKind {
    /// The kind of a concrete JSON value. `Null` reports as `Any` since it
    /// carries no shape of its own.
    pub fn of(value: &Value) -> ValueKind {
        match value {
            Value::String(_) => ValueKind::String,
            Value::Number(_) => ValueKind::Number,
            Value::Bool(_) => ValueKind::Bool,
            Value::Object(_) => ValueKind::Object,
            Value::Array(_) => ValueKind::Array,
            Value::Null => ValueKind::Any,
        }
    }

    /// Whether a concrete JSON value satisfies this declared kind.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ValueKind::Any => true,
            kind => *kind == ValueKind::of(value),
        }
    }
}

// ---------------------------------------------------------------------------
// MergePolicy
// ---------------------------------------------------------------------------

/// Per-field rule governing how a node's output is combined into the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Last writer wins.
    Overwrite,
    /// Value is pushed onto an ordered JSON array. Safe for concurrent
    /// writers within one wave.
    Append,
    /// Write is ignored if the field is already set.
    FirstWrite,
    /// Two writers touching the field within one wave is a fatal error.
    ErrorOnConflict,
}

impl Default for MergePolicy {
    fn default() -> Self {
        MergePolicy::Overwrite
    }
}

// ---------------------------------------------------------------------------
// FieldSpec
// ---------------------------------------------------------------------------

/// Declaration of a single state field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name. Unique within a graph.
    pub name: String,
    /// Declared value kind.
    #[serde(default = "default_kind")]
    pub kind: ValueKind,
    /// Merge policy, fixed for the lifetime of the graph.
    #[serde(default)]
    pub merge: MergePolicy,
}

fn default_kind() -> ValueKind {
    ValueKind::Any
}

impl FieldSpec {
    /// Shorthand for an `Any`-kinded field with the given merge policy.
    pub fn new(name: impl Into<String>, merge: MergePolicy) -> Self {
        Self {
            name: name.into(),
            kind: ValueKind::Any,
            merge,
        }
    }

    /// Set the declared value kind.
    pub fn with_kind(mut self, kind: ValueKind) -> Self {
        self.kind = kind;
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_kind_of_matches_json_shape() {
        assert_eq!(ValueKind::of(&json!("x")), ValueKind::String);
        assert_eq!(ValueKind::of(&json!(1.5)), ValueKind::Number);
        assert_eq!(ValueKind::of(&json!(true)), ValueKind::Bool);
        assert_eq!(ValueKind::of(&json!({"a": 1})), ValueKind::Object);
        assert_eq!(ValueKind::of(&json!([1, 2])), ValueKind::Array);
        assert_eq!(ValueKind::of(&Value::Null), ValueKind::Any);
    }

    #[test]
    fn any_accepts_everything() {
        assert!(ValueKind::Any.accepts(&json!("x")));
        assert!(ValueKind::Any.accepts(&json!({})));
        assert!(ValueKind::Any.accepts(&Value::Null));
    }

    #[test]
    fn typed_kind_rejects_mismatch() {
        assert!(ValueKind::String.accepts(&json!("x")));
        assert!(!ValueKind::String.accepts(&json!(42)));
        assert!(!ValueKind::Object.accepts(&json!([])));
    }

    #[test]
    fn merge_policy_serde_snake_case() {
        let json = serde_json::to_string(&MergePolicy::ErrorOnConflict).unwrap();
        assert_eq!(json, "\"error_on_conflict\"");
        let parsed: MergePolicy = serde_json::from_str("\"first_write\"").unwrap();
        assert_eq!(parsed, MergePolicy::FirstWrite);
    }

    #[test]
    fn field_spec_defaults() {
        let yaml = "name: report";
        let spec: FieldSpec = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(spec.name, "report");
        assert_eq!(spec.kind, ValueKind::Any);
        assert_eq!(spec.merge, MergePolicy::Overwrite);
    }

    #[test]
    fn field_spec_builder() {
        let spec = FieldSpec::new("notes", MergePolicy::Append).with_kind(ValueKind::String);
        assert_eq!(spec.kind, ValueKind::String);
        assert_eq!(spec.merge, MergePolicy::Append);
    }
}
