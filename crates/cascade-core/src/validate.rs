//! Output validation against a node's declared schema and write set.
//!
//! Validation runs on every attempt's output before anything reaches the
//! state container. A failed attempt never mutates state; the failure is
//! rendered into a corrective hint for the next attempt when the node's
//! retry policy asks for one.

use std::fmt;

use cascade_types::field::ValueKind;
use cascade_types::graph::{NodeSpec, OutputSchema};

use crate::state::PartialOutput;

// ---------------------------------------------------------------------------
// ValidationProblem
// ---------------------------------------------------------------------------

/// A single defect found in a node's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationProblem {
    /// A required schema field is missing from the output.
    MissingRequired { field: String },
    /// A field is present but does not match the declared kind.
    KindMismatch {
        field: String,
        expected: ValueKind,
        actual: ValueKind,
    },
    /// The output contains a field outside the node's declared writes.
    UndeclaredWrite { field: String },
}

impl fmt::Display for ValidationProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRequired { field } => {
                write!(f, "required field '{field}' is missing")
            }
            Self::KindMismatch {
                field,
                expected,
                actual,
            } => write!(f, "field '{field}' must be {expected:?}, got {actual:?}"),
            Self::UndeclaredWrite { field } => {
                write!(f, "field '{field}' is outside the declared writes")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ValidationFailure
// ---------------------------------------------------------------------------

/// All problems found in one attempt's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub node_id: String,
    pub problems: Vec<ValidationProblem>,
}

impl ValidationFailure {
    /// Render the problems as a corrective hint for the next attempt.
    pub fn hint(&self) -> String {
        let lines: Vec<String> = self
            .problems
            .iter()
            .map(|p| format!("- {p}"))
            .collect();
        format!(
            "The previous output was rejected. Fix the following and try again:\n{}",
            lines.join("\n")
        )
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.problems.iter().map(|p| p.to_string()).collect();
        write!(
            f,
            "output of node '{}' failed validation: {}",
            self.node_id,
            rendered.join("; ")
        )
    }
}

impl std::error::Error for ValidationFailure {}

// ---------------------------------------------------------------------------
// validate_output
// ---------------------------------------------------------------------------

/// Check one attempt's output against the node's schema and write set.
///
/// All problems are collected in one pass so a corrective hint can name
/// everything at once instead of surfacing defects one retry at a time.
pub fn validate_output(node: &NodeSpec, output: &PartialOutput) -> Result<(), ValidationFailure> {
    let mut problems = Vec::new();

    for field in output.keys() {
        if !node.writes.iter().any(|w| w == field) {
            problems.push(ValidationProblem::UndeclaredWrite {
                field: field.clone(),
            });
        }
    }

    check_schema(&node.output_schema, output, &mut problems);

    if problems.is_empty() {
        Ok(())
    } else {
        Err(ValidationFailure {
            node_id: node.id.clone(),
            problems,
        })
    }
}

fn check_schema(schema: &OutputSchema, output: &PartialOutput, problems: &mut Vec<ValidationProblem>) {
    for field in &schema.fields {
        match output.get(&field.name) {
            None => {
                if field.required {
                    problems.push(ValidationProblem::MissingRequired {
                        field: field.name.clone(),
                    });
                }
            }
            Some(value) => {
                if !field.kind.accepts(value) {
                    problems.push(ValidationProblem::KindMismatch {
                        field: field.name.clone(),
                        expected: field.kind,
                        actual: ValueKind::of(value),
                    });
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_types::graph::SchemaField;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn node() -> NodeSpec {
        NodeSpec::new("report")
            .writes(&["summary", "score"])
            .schema(OutputSchema {
                fields: vec![
                    SchemaField::required("summary", ValueKind::String),
                    SchemaField::optional("score", ValueKind::Number),
                ],
            })
    }

    fn output(pairs: &[(&str, serde_json::Value)]) -> PartialOutput {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn valid_output_passes() {
        let out = output(&[("summary", json!("fine")), ("score", json!(0.9))]);
        assert!(validate_output(&node(), &out).is_ok());
    }

    #[test]
    fn optional_field_may_be_absent() {
        let out = output(&[("summary", json!("fine"))]);
        assert!(validate_output(&node(), &out).is_ok());
    }

    #[test]
    fn missing_required_field_fails() {
        let out = output(&[("score", json!(1))]);
        let failure = validate_output(&node(), &out).unwrap_err();
        assert_eq!(
            failure.problems,
            vec![ValidationProblem::MissingRequired {
                field: "summary".into()
            }]
        );
    }

    #[test]
    fn kind_mismatch_fails() {
        let out = output(&[("summary", json!(42))]);
        let failure = validate_output(&node(), &out).unwrap_err();
        assert!(matches!(
            failure.problems[0],
            ValidationProblem::KindMismatch { .. }
        ));
    }

    #[test]
    fn undeclared_write_fails() {
        let out = output(&[("summary", json!("fine")), ("rogue", json!(true))]);
        let failure = validate_output(&node(), &out).unwrap_err();
        assert!(failure
            .problems
            .contains(&ValidationProblem::UndeclaredWrite {
                field: "rogue".into()
            }));
    }

    #[test]
    fn all_problems_collected_at_once() {
        let out = output(&[("rogue", json!(1)), ("score", json!("not a number"))]);
        let failure = validate_output(&node(), &out).unwrap_err();
        assert_eq!(failure.problems.len(), 3);
    }

    #[test]
    fn hint_names_every_problem() {
        let failure = validate_output(&node(), &BTreeMap::new()).unwrap_err();
        let hint = failure.hint();
        assert!(hint.contains("'summary'"));
        assert!(hint.contains("rejected"));
    }
}
