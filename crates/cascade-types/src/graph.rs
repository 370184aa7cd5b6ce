//! Declarative node and graph specs.
//!
//! A `NodeSpec` is the data half of a node: its identity, declared reads and
//! writes, output schema, retry policy, and timeout. The work function is
//! bound separately at graph-build time. `GraphConfig` carries the run-level
//! knobs: wave budget, concurrency bound, failure policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::field::ValueKind;

// ---------------------------------------------------------------------------
// Output schema
// ---------------------------------------------------------------------------

/// One field of a node's declared output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    /// Field name; must be a member of the node's `writes` set.
    pub name: String,
    /// Expected value kind.
    #[serde(default = "any_kind")]
    pub kind: ValueKind,
    /// Whether the field must be present in every successful output.
    #[serde(default = "default_true")]
    pub required: bool,
}

fn any_kind() -> ValueKind {
    ValueKind::Any
}

fn default_true() -> bool {
    true
}

impl SchemaField {
    /// A required field of the given kind.
    pub fn required(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    /// An optional field of the given kind.
    pub fn optional(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
}

/// Structural description of a node's partial output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputSchema {
    #[serde(default)]
    pub fields: Vec<SchemaField>,
}

impl OutputSchema {
    pub fn new(fields: Vec<SchemaField>) -> Self {
        Self { fields }
    }

    /// Look up a schema field by name.
    pub fn field(&self, name: &str) -> Option<&SchemaField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// How a node reacts to a validation failure on retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationRetry {
    /// Re-run the node with identical inputs.
    Rerun,
    /// Re-run with a structured description of the validation failure so the
    /// node can adapt (e.g. re-prompt an external generator).
    CorrectiveHint,
}

impl Default for ValidationRetry {
    fn default() -> Self {
        ValidationRetry::Rerun
    }
}

/// Retry configuration for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts (default 3). The first execution counts
    /// as attempt 1.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between attempts, in milliseconds (default 0).
    #[serde(default)]
    pub backoff_ms: u64,
    /// Behavior when an attempt fails output validation.
    #[serde(default)]
    pub on_validation: ValidationRetry,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: 0,
            on_validation: ValidationRetry::default(),
        }
    }
}

impl RetryPolicy {
    /// A single-attempt policy (no retries).
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 0,
            on_validation: ValidationRetry::Rerun,
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

// ---------------------------------------------------------------------------
// Node spec
// ---------------------------------------------------------------------------

/// Default per-attempt node timeout (5 minutes).
pub const DEFAULT_NODE_TIMEOUT_SECS: u64 = 300;

/// The declarative half of a node: identity, field contract, retry, timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    /// Unique node id within a graph (e.g. "market-report").
    pub id: String,
    /// Fields this node requires as non-absent preconditions.
    #[serde(default)]
    pub reads: Vec<String>,
    /// Fields this node is permitted to write.
    #[serde(default)]
    pub writes: Vec<String>,
    /// Schema the node's partial output is validated against.
    #[serde(default)]
    pub output_schema: OutputSchema,
    /// Retry configuration.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Per-attempt wall-clock budget in seconds (default 300).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl NodeSpec {
    /// A node with empty reads/writes and default retry/timeout.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            reads: Vec::new(),
            writes: Vec::new(),
            output_schema: OutputSchema::default(),
            retry: RetryPolicy::default(),
            timeout_secs: None,
        }
    }

    pub fn reads(mut self, fields: &[&str]) -> Self {
        self.reads = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn writes(mut self, fields: &[&str]) -> Self {
        self.writes = fields.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn schema(mut self, schema: OutputSchema) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Effective per-attempt timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_NODE_TIMEOUT_SECS))
    }
}

// ---------------------------------------------------------------------------
// Edge spec (static fan-out for declarative definitions)
// ---------------------------------------------------------------------------

/// An unconditional routing edge: when `from` completes, dispatch `to`.
///
/// Declarative definitions use static edges; programmatic graphs may instead
/// attach router functions that inspect state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub from: String,
    /// Target node ids; empty means the edge is terminal.
    #[serde(default)]
    pub to: Vec<String>,
}

// ---------------------------------------------------------------------------
// Graph config
// ---------------------------------------------------------------------------

/// Default wave budget before a run is declared divergent.
pub const DEFAULT_MAX_WAVES: u32 = 50;

/// Default bound on concurrently executing nodes within a wave.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// What the executor does when a node fails terminally within a wave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Any terminal node failure aborts the run, cancelling in-flight
    /// siblings and discarding their outputs.
    FailFast,
    /// Failing nodes leave their fields absent; the wave merges the
    /// surviving siblings and the run continues.
    BestEffort,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::FailFast
    }
}

/// Run-level execution knobs, fixed at graph-build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Maximum number of waves before the run fails with divergence.
    #[serde(default = "default_max_waves")]
    pub max_waves: u32,
    /// Maximum nodes executing concurrently within a wave.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Partial-failure policy.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_max_waves() -> u32 {
    DEFAULT_MAX_WAVES
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_waves: DEFAULT_MAX_WAVES,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            failure_policy: FailurePolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_default_max_attempts() {
        let yaml = "backoff_ms: 50";
        let policy: RetryPolicy = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_ms, 50);
        assert_eq!(policy.on_validation, ValidationRetry::Rerun);
    }

    #[test]
    fn retry_policy_corrective_hint_serde() {
        let policy = RetryPolicy {
            max_attempts: 2,
            backoff_ms: 10,
            on_validation: ValidationRetry::CorrectiveHint,
        };
        let json = serde_json::to_string(&policy).unwrap();
        assert!(json.contains("\"corrective_hint\""));
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, policy);
    }

    #[test]
    fn node_spec_yaml_roundtrip() {
        let yaml = r#"
id: market-report
reads: [request]
writes: [market_data]
output_schema:
  fields:
    - name: market_data
      kind: object
retry:
  max_attempts: 2
  on_validation: corrective_hint
timeout_secs: 30
"#;
        let spec: NodeSpec = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(spec.id, "market-report");
        assert_eq!(spec.reads, vec!["request"]);
        assert_eq!(spec.writes, vec!["market_data"]);
        assert_eq!(spec.output_schema.fields.len(), 1);
        assert!(spec.output_schema.fields[0].required);
        assert_eq!(spec.retry.max_attempts, 2);
        assert_eq!(spec.timeout(), Duration::from_secs(30));

        let yaml2 = serde_yaml_ng::to_string(&spec).unwrap();
        let spec2: NodeSpec = serde_yaml_ng::from_str(&yaml2).unwrap();
        assert_eq!(spec2.id, spec.id);
        assert_eq!(spec2.retry, spec.retry);
    }

    #[test]
    fn node_spec_defaults() {
        let spec = NodeSpec::new("a");
        assert!(spec.reads.is_empty());
        assert!(spec.writes.is_empty());
        assert_eq!(spec.retry.max_attempts, 3);
        assert_eq!(spec.timeout(), Duration::from_secs(DEFAULT_NODE_TIMEOUT_SECS));
    }

    #[test]
    fn graph_config_defaults() {
        let config: GraphConfig = serde_yaml_ng::from_str("{}").unwrap();
        assert_eq!(config.max_waves, DEFAULT_MAX_WAVES);
        assert_eq!(config.max_concurrency, DEFAULT_MAX_CONCURRENCY);
        assert_eq!(config.failure_policy, FailurePolicy::FailFast);
    }

    #[test]
    fn failure_policy_serde() {
        let json = serde_json::to_string(&FailurePolicy::BestEffort).unwrap();
        assert_eq!(json, "\"best_effort\"");
    }

    #[test]
    fn schema_field_lookup() {
        let schema = OutputSchema::new(vec![
            SchemaField::required("a", ValueKind::String),
            SchemaField::optional("b", ValueKind::Number),
        ]);
        assert!(schema.field("a").unwrap().required);
        assert!(!schema.field("b").unwrap().required);
        assert!(schema.field("c").is_none());
    }
}
