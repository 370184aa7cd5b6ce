//! Declarative graph definitions: YAML parsing, validation, and filesystem
//! operations.
//!
//! A `GraphDefinition` is the data half of a graph: fields, node specs,
//! static edges, entry, config. Work functions cannot live in YAML, so a
//! definition is bound to a handler registry by node id to produce a
//! runnable `Graph`; binding re-runs the full build-time checks.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cascade_types::error::BuildError;
use cascade_types::field::FieldSpec;
use cascade_types::graph::{EdgeSpec, GraphConfig, NodeSpec};

use crate::graph::{Graph, GraphBuilder};
use crate::node::BoxNodeHandler;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors raised while loading or binding a graph definition.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Definition-level validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Structural check failure while binding to handlers.
    #[error(transparent)]
    Build(#[from] BuildError),
}

// ---------------------------------------------------------------------------
// GraphDefinition
// ---------------------------------------------------------------------------

fn default_version() -> String {
    "1".to_string()
}

/// A graph as it appears in a YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphDefinition {
    /// Graph name: non-empty, alphanumeric and hyphens only.
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Entry node id.
    pub entry: String,
    #[serde(default)]
    pub config: GraphConfig,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
}

impl GraphDefinition {
    /// Bind this definition to concrete work functions and build the graph.
    ///
    /// Every node id in the definition must have a handler in the registry.
    pub fn bind(
        self,
        mut handlers: BTreeMap<String, BoxNodeHandler>,
    ) -> Result<Graph, DefinitionError> {
        validate_definition(&self)?;

        let mut builder = GraphBuilder::new(self.name)
            .entry(self.entry)
            .config(self.config);
        for field in self.fields {
            builder = builder.field(field);
        }
        for spec in self.nodes {
            let handler = handlers.remove(&spec.id).ok_or_else(|| {
                DefinitionError::Validation(format!("no handler registered for node '{}'", spec.id))
            })?;
            builder = builder.node(spec, handler);
        }
        for edge in self.edges {
            let targets: Vec<&str> = edge.to.iter().map(String::as_str).collect();
            builder = builder.edge(edge.from, &targets);
        }
        Ok(builder.build()?)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `GraphDefinition`.
pub fn parse_graph_yaml(yaml: &str) -> Result<GraphDefinition, DefinitionError> {
    let def: GraphDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| DefinitionError::Parse(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Serialize a `GraphDefinition` to a YAML string.
pub fn serialize_graph_yaml(def: &GraphDefinition) -> Result<String, DefinitionError> {
    serde_yaml_ng::to_string(def).map_err(|e| DefinitionError::Parse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate definition-level constraints.
///
/// Checks:
/// - Name is non-empty and contains only alphanumeric characters and hyphens
/// - At least one node exists
/// - Node ids and field names are unique
/// - The entry id names a declared node
/// - Edge endpoints name declared nodes
///
/// Field references and writer overlap are checked later by the graph
/// builder, whose checks run again at bind time.
pub fn validate_definition(def: &GraphDefinition) -> Result<(), DefinitionError> {
    if def.name.is_empty() {
        return Err(DefinitionError::Validation(
            "graph name must not be empty".to_string(),
        ));
    }
    if !def.name.chars().all(|c| c.is_alphanumeric() || c == '-') {
        return Err(DefinitionError::Validation(format!(
            "graph name '{}' contains invalid characters (only alphanumeric and hyphens allowed)",
            def.name
        )));
    }

    if def.nodes.is_empty() {
        return Err(DefinitionError::Validation(
            "graph must have at least one node".to_string(),
        ));
    }

    let mut node_ids = HashSet::new();
    for node in &def.nodes {
        if !node_ids.insert(node.id.as_str()) {
            return Err(DefinitionError::Validation(format!(
                "duplicate node id: '{}'",
                node.id
            )));
        }
    }

    let mut field_names = HashSet::new();
    for field in &def.fields {
        if !field_names.insert(field.name.as_str()) {
            return Err(DefinitionError::Validation(format!(
                "duplicate field declaration: '{}'",
                field.name
            )));
        }
    }

    if !node_ids.contains(def.entry.as_str()) {
        return Err(DefinitionError::Validation(format!(
            "entry node '{}' is not declared",
            def.entry
        )));
    }

    for edge in &def.edges {
        if !node_ids.contains(edge.from.as_str()) {
            return Err(DefinitionError::Validation(format!(
                "edge source '{}' is not a declared node",
                edge.from
            )));
        }
        for target in &edge.to {
            if !node_ids.contains(target.as_str()) {
                return Err(DefinitionError::Validation(format!(
                    "edge from '{}' targets undeclared node '{}'",
                    edge.from, target
                )));
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a graph definition from a YAML file.
pub fn load_graph_file(path: &Path) -> Result<GraphDefinition, DefinitionError> {
    let content = std::fs::read_to_string(path)?;
    parse_graph_yaml(&content)
}

/// Save a graph definition to a YAML file.
///
/// Creates parent directories if they don't exist.
pub fn save_graph_file(path: &Path, def: &GraphDefinition) -> Result<(), DefinitionError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serialize_graph_yaml(def)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

/// Discover all graph YAML files under `base_dir`.
///
/// Scans `.yaml` and `.yml` files recursively. Files that fail to parse are
/// skipped with a warning rather than failing discovery.
pub fn discover_graphs(base_dir: &Path) -> Result<Vec<(PathBuf, GraphDefinition)>, DefinitionError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, GraphDefinition)>,
) -> Result<(), DefinitionError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if let Some(ext) = path.extension() {
            if ext == "yaml" || ext == "yml" {
                match load_graph_file(&path) {
                    Ok(def) => results.push((path, def)),
                    Err(_) => {
                        tracing::warn!(?path, "skipping unparseable graph file");
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
