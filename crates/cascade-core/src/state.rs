//! Typed, mergeable state container.
//!
//! `StateContainer` is the single mutable state object of a run. It is owned
//! and mutated exclusively by the executor; nodes only ever see read-only
//! `StateSnapshot`s and return additive partial outputs. Each field is
//! declared up front with a `MergePolicy` that is fixed for the whole run.
//!
//! Append fields are always stored as JSON arrays: every write is
//! concatenated onto the sequence (array values contribute their elements,
//! scalars are pushed as single elements), and seeding an append field with
//! a non-array value wraps it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use cascade_types::field::{FieldSpec, MergePolicy, ValueKind};

/// A node's partial output: the fields it wrote this attempt.
pub type PartialOutput = BTreeMap<String, Value>;

// ---------------------------------------------------------------------------
// StateError
// ---------------------------------------------------------------------------

/// Errors raised while seeding or merging state.
#[derive(Debug, Clone, Error)]
pub enum StateError {
    /// A writer produced a field that was never declared.
    #[error("writer '{writer}' wrote undeclared field '{field}'")]
    UnknownField { field: String, writer: String },

    /// A written value does not match the field's declared kind.
    #[error("field '{field}' expects {expected:?}, writer '{writer}' wrote {actual:?}")]
    KindMismatch {
        field: String,
        writer: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    /// Two writers touched an `error_on_conflict` field within one wave.
    #[error("field '{field}' written by both '{first}' and '{second}' in the same wave")]
    Conflict {
        field: String,
        first: String,
        second: String,
    },
}

// ---------------------------------------------------------------------------
// StateSnapshot
// ---------------------------------------------------------------------------

/// Immutable point-in-time copy of the state, handed to every node in a wave.
///
/// Cheap to clone: the underlying map is shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    values: Arc<BTreeMap<String, Value>>,
}

impl StateSnapshot {
    /// Read a field; `None` means the field is absent.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Whether a field is non-absent.
    pub fn is_set(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    /// All set fields, in field-name order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

// ---------------------------------------------------------------------------
// StateContainer
// ---------------------------------------------------------------------------

/// The mutable state of a single run.
#[derive(Debug, Clone)]
pub struct StateContainer {
    specs: Arc<BTreeMap<String, FieldSpec>>,
    values: BTreeMap<String, Value>,
}

impl StateContainer {
    /// Create an empty container over the given field declarations.
    pub fn new(specs: Arc<BTreeMap<String, FieldSpec>>) -> Self {
        Self {
            specs,
            values: BTreeMap::new(),
        }
    }

    /// Load the caller-supplied initial snapshot.
    ///
    /// Every seeded field must be declared and kind-correct. Seeding an
    /// append field with a non-array value wraps it in a one-element array.
    pub fn seed(&mut self, initial: BTreeMap<String, Value>) -> Result<(), StateError> {
        for (field, value) in initial {
            let spec = self.spec(&field, "<initial>")?;
            check_kind(spec, &value, "<initial>")?;
            let stored = match (spec.merge, value) {
                (MergePolicy::Append, Value::Array(items)) => Value::Array(items),
                (MergePolicy::Append, other) => Value::Array(vec![other]),
                (_, other) => other,
            };
            self.values.insert(field, stored);
        }
        Ok(())
    }

    /// Read a field; `None` means the field is absent.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Whether a field is non-absent.
    pub fn is_set(&self, field: &str) -> bool {
        self.values.contains_key(field)
    }

    /// Take an immutable snapshot for dispatching a wave.
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            values: Arc::new(self.values.clone()),
        }
    }

    /// Merge one settled wave's outputs, keyed by writer node id.
    ///
    /// Outputs are applied in writer-id order so identical runs produce
    /// identical states regardless of completion order within the wave.
    /// Returns the names of the fields that changed.
    pub fn merge_wave(
        &mut self,
        outputs: &BTreeMap<String, PartialOutput>,
    ) -> Result<Vec<String>, StateError> {
        // First writer of each field within this wave, for conflict reporting.
        let mut wave_writers: BTreeMap<&str, &str> = BTreeMap::new();
        let mut merged = Vec::new();

        for (writer, output) in outputs {
            for (field, value) in output {
                let spec = self.spec(field, writer)?;
                check_kind(spec, value, writer)?;

                match spec.merge {
                    MergePolicy::Overwrite => {
                        self.values.insert(field.clone(), value.clone());
                        merged.push(field.clone());
                    }
                    MergePolicy::Append => {
                        let entry = self
                            .values
                            .entry(field.clone())
                            .or_insert_with(|| Value::Array(Vec::new()));
                        if let Value::Array(seq) = entry {
                            match value {
                                Value::Array(items) => seq.extend(items.iter().cloned()),
                                other => seq.push(other.clone()),
                            }
                        }
                        merged.push(field.clone());
                    }
                    MergePolicy::FirstWrite => {
                        if !self.values.contains_key(field) {
                            self.values.insert(field.clone(), value.clone());
                            merged.push(field.clone());
                        }
                    }
                    MergePolicy::ErrorOnConflict => {
                        if let Some(first) = wave_writers.get(field.as_str()) {
                            return Err(StateError::Conflict {
                                field: field.clone(),
                                first: (*first).to_string(),
                                second: writer.clone(),
                            });
                        }
                        self.values.insert(field.clone(), value.clone());
                        merged.push(field.clone());
                    }
                }
                wave_writers.entry(field.as_str()).or_insert(writer.as_str());
            }
        }

        merged.sort();
        merged.dedup();
        Ok(merged)
    }

    /// Hand the final values to the caller when the run ends.
    pub fn into_values(self) -> BTreeMap<String, Value> {
        self.values
    }

    fn spec(&self, field: &str, writer: &str) -> Result<&FieldSpec, StateError> {
        self.specs.get(field).ok_or_else(|| StateError::UnknownField {
            field: field.to_string(),
            writer: writer.to_string(),
        })
    }
}

fn check_kind(spec: &FieldSpec, value: &Value, writer: &str) -> Result<(), StateError> {
    // Append fields declare the element kind; an array write contributes
    // its elements, so the array shape itself is always acceptable.
    if spec.merge == MergePolicy::Append && value.is_array() {
        return Ok(());
    }
    if !spec.kind.accepts(value) {
        return Err(StateError::KindMismatch {
            field: spec.name.clone(),
            writer: writer.to_string(),
            expected: spec.kind,
            actual: ValueKind::of(value),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
