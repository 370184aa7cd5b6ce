//! Graph construction and build-time structural validation.
//!
//! A `Graph` is immutable once built and reusable across runs. All wiring
//! defects that can be caught before execution are caught here: unknown
//! fields, dangling static edges, schema fields outside a node's writes,
//! and writer overlap on fields whose merge policy cannot arbitrate it.
//!
//! Writer overlap is permitted for `append` (concurrent-safe by
//! construction) and for `error_on_conflict` (the policy whose job is to
//! arbitrate overlap at run time); it is rejected for `overwrite` and
//! `first_write` because those would race silently.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cascade_types::error::BuildError;
use cascade_types::field::{FieldSpec, MergePolicy};
use cascade_types::graph::{GraphConfig, NodeSpec};

use crate::node::BoxNodeHandler;
use crate::router::{BoxRouter, Router, StaticRouter};

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

/// One registered node: its declaration, work function, and router.
pub(crate) struct NodeEntry {
    pub(crate) spec: NodeSpec,
    pub(crate) handler: BoxNodeHandler,
    pub(crate) router: Option<BoxRouter>,
}

/// A validated, immutable, reusable workflow graph.
pub struct Graph {
    name: String,
    entry: String,
    config: GraphConfig,
    fields: Arc<BTreeMap<String, FieldSpec>>,
    nodes: BTreeMap<String, NodeEntry>,
    global_router: Option<BoxRouter>,
}

impl Graph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Declared field specs, shared with each run's state container.
    pub(crate) fn fields(&self) -> Arc<BTreeMap<String, FieldSpec>> {
        Arc::clone(&self.fields)
    }

    pub(crate) fn node(&self, id: &str) -> Option<&NodeEntry> {
        self.nodes.get(id)
    }

    pub(crate) fn global_router(&self) -> Option<&BoxRouter> {
        self.global_router.as_ref()
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.name)
            .field("entry", &self.entry)
            .field("nodes", &self.nodes.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// GraphBuilder
// ---------------------------------------------------------------------------

/// Collects declarations, then validates everything at once in [`build`].
///
/// [`build`]: GraphBuilder::build
pub struct GraphBuilder {
    name: String,
    entry: Option<String>,
    config: GraphConfig,
    fields: Vec<FieldSpec>,
    nodes: Vec<(NodeSpec, BoxNodeHandler)>,
    routers: BTreeMap<String, BoxRouter>,
    static_edges: Vec<(String, Vec<String>)>,
    global_router: Option<BoxRouter>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: None,
            config: GraphConfig::default(),
            fields: Vec::new(),
            nodes: Vec::new(),
            routers: BTreeMap::new(),
            static_edges: Vec::new(),
            global_router: None,
        }
    }

    /// Declare a state field.
    pub fn field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    /// Register a node and its work function.
    pub fn node(mut self, spec: NodeSpec, handler: BoxNodeHandler) -> Self {
        self.nodes.push((spec, handler));
        self
    }

    /// Install a dynamic router for a node.
    pub fn router(mut self, node_id: impl Into<String>, router: impl Router + 'static) -> Self {
        self.routers.insert(node_id.into(), Arc::new(router));
        self
    }

    /// Declare a static edge. An empty target list marks the node terminal.
    pub fn edge(mut self, from: impl Into<String>, to: &[&str]) -> Self {
        self.static_edges
            .push((from.into(), to.iter().map(|t| t.to_string()).collect()));
        self
    }

    /// Install a single router consulted for every completed node. A node's
    /// own router, if any, takes precedence.
    pub fn global_router(mut self, router: impl Router + 'static) -> Self {
        self.global_router = Some(Arc::new(router));
        self
    }

    pub fn entry(mut self, node_id: impl Into<String>) -> Self {
        self.entry = Some(node_id.into());
        self
    }

    pub fn config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate all declarations and produce the immutable graph.
    pub fn build(self) -> Result<Graph, BuildError> {
        if self.nodes.is_empty() {
            return Err(BuildError::Empty);
        }
        if self.config.max_waves == 0 {
            return Err(BuildError::InvalidConfig("max_waves must be at least 1".into()));
        }
        if self.config.max_concurrency == 0 {
            return Err(BuildError::InvalidConfig(
                "max_concurrency must be at least 1".into(),
            ));
        }

        let mut fields: BTreeMap<String, FieldSpec> = BTreeMap::new();
        for spec in self.fields {
            if fields.contains_key(&spec.name) {
                return Err(BuildError::DuplicateField(spec.name));
            }
            fields.insert(spec.name.clone(), spec);
        }

        let node_ids: BTreeSet<&str> = self.nodes.iter().map(|(s, _)| s.id.as_str()).collect();
        if node_ids.len() != self.nodes.len() {
            let mut seen = BTreeSet::new();
            for (spec, _) in &self.nodes {
                if !seen.insert(spec.id.as_str()) {
                    return Err(BuildError::DuplicateNode(spec.id.clone()));
                }
            }
        }

        let entry = self.entry.ok_or_else(|| BuildError::MissingEntry(String::new()))?;
        if !node_ids.contains(entry.as_str()) {
            return Err(BuildError::MissingEntry(entry));
        }

        // Field references and schema containment.
        for (spec, _) in &self.nodes {
            for field in spec.reads.iter().chain(spec.writes.iter()) {
                if !fields.contains_key(field) {
                    return Err(BuildError::UnknownField {
                        node: spec.id.clone(),
                        field: field.clone(),
                    });
                }
            }
            for schema_field in &spec.output_schema.fields {
                if !spec.writes.iter().any(|w| w == &schema_field.name) {
                    return Err(BuildError::SchemaOutsideWrites {
                        node: spec.id.clone(),
                        field: schema_field.name.clone(),
                    });
                }
            }
        }

        // Writer overlap on fields that cannot arbitrate concurrent writes.
        let mut writers: BTreeMap<&str, &str> = BTreeMap::new();
        for (spec, _) in &self.nodes {
            for field in &spec.writes {
                let policy = fields
                    .get(field)
                    .map(|f| f.merge)
                    .unwrap_or(MergePolicy::Overwrite);
                if matches!(policy, MergePolicy::Append | MergePolicy::ErrorOnConflict) {
                    continue;
                }
                if let Some(first) = writers.get(field.as_str()) {
                    return Err(BuildError::ConflictingWriters {
                        field: field.clone(),
                        first: (*first).to_string(),
                        second: spec.id.clone(),
                    });
                }
                writers.insert(field.as_str(), spec.id.as_str());
            }
        }

        // Static edges must target registered nodes.
        let mut static_routes: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (from, targets) in self.static_edges {
            if !node_ids.contains(from.as_str()) {
                return Err(BuildError::DanglingEdge {
                    from: from.clone(),
                    to: from.clone(),
                });
            }
            for to in &targets {
                if !node_ids.contains(to.as_str()) {
                    return Err(BuildError::DanglingEdge {
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
            }
            static_routes.entry(from).or_default().extend(targets);
        }

        let mut routers = self.routers;
        for node_id in routers.keys() {
            if !node_ids.contains(node_id.as_str()) {
                return Err(BuildError::DanglingEdge {
                    from: node_id.clone(),
                    to: node_id.clone(),
                });
            }
        }
        for (from, targets) in static_routes {
            if routers.contains_key(&from) {
                return Err(BuildError::InvalidConfig(format!(
                    "node '{from}' has both a static edge and a dynamic router"
                )));
            }
            routers.insert(from, Arc::new(StaticRouter::new(targets)));
        }

        let nodes = self
            .nodes
            .into_iter()
            .map(|(spec, handler)| {
                let router = routers.remove(&spec.id);
                (
                    spec.id.clone(),
                    NodeEntry {
                        spec,
                        handler,
                        router,
                    },
                )
            })
            .collect();

        Ok(Graph {
            name: self.name,
            entry,
            config: self.config,
            fields: Arc::new(fields),
            nodes,
            global_router: self.global_router,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{PartialOutput, handler_fn};
    use crate::router::Transition;
    use cascade_types::field::ValueKind;
    use cascade_types::graph::{OutputSchema, SchemaField};

    fn noop() -> BoxNodeHandler {
        handler_fn(|_, _, _| async { Ok(PartialOutput::new()) })
    }

    fn base() -> GraphBuilder {
        GraphBuilder::new("test")
            .field(FieldSpec::new("a", MergePolicy::Overwrite))
            .field(FieldSpec::new("b", MergePolicy::Overwrite))
    }

    #[test]
    fn minimal_graph_builds() {
        let graph = base()
            .node(NodeSpec::new("only").writes(&["a"]), noop())
            .entry("only")
            .build()
            .unwrap();
        assert_eq!(graph.entry(), "only");
        assert_eq!(graph.node_ids().collect::<Vec<_>>(), vec!["only"]);
    }

    #[test]
    fn empty_graph_rejected() {
        assert!(matches!(
            GraphBuilder::new("test").entry("x").build(),
            Err(BuildError::Empty)
        ));
    }

    #[test]
    fn missing_entry_rejected() {
        let err = base()
            .node(NodeSpec::new("only"), noop())
            .entry("nope")
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::MissingEntry(id) if id == "nope"));
    }

    #[test]
    fn duplicate_node_rejected() {
        let err = base()
            .node(NodeSpec::new("dup"), noop())
            .node(NodeSpec::new("dup"), noop())
            .entry("dup")
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::DuplicateNode(id) if id == "dup"));
    }

    #[test]
    fn duplicate_field_rejected() {
        let err = base()
            .field(FieldSpec::new("a", MergePolicy::Append))
            .node(NodeSpec::new("only"), noop())
            .entry("only")
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::DuplicateField(f) if f == "a"));
    }

    #[test]
    fn undeclared_field_reference_rejected() {
        let err = base()
            .node(NodeSpec::new("only").reads(&["ghost"]), noop())
            .entry("only")
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::UnknownField { node, field }
            if node == "only" && field == "ghost"));
    }

    #[test]
    fn schema_outside_writes_rejected() {
        let err = base()
            .node(
                NodeSpec::new("only").writes(&["a"]).schema(OutputSchema {
                    fields: vec![SchemaField::required("b", ValueKind::String)],
                }),
                noop(),
            )
            .entry("only")
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::SchemaOutsideWrites { .. }));
    }

    #[test]
    fn overwrite_writer_overlap_rejected() {
        let err = base()
            .node(NodeSpec::new("x").writes(&["a"]), noop())
            .node(NodeSpec::new("y").writes(&["a"]), noop())
            .entry("x")
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::ConflictingWriters { field, .. } if field == "a"));
    }

    #[test]
    fn append_writer_overlap_allowed() {
        let graph = GraphBuilder::new("test")
            .field(FieldSpec::new("log", MergePolicy::Append))
            .node(NodeSpec::new("x").writes(&["log"]), noop())
            .node(NodeSpec::new("y").writes(&["log"]), noop())
            .entry("x")
            .build();
        assert!(graph.is_ok());
    }

    #[test]
    fn error_on_conflict_overlap_allowed() {
        let graph = GraphBuilder::new("test")
            .field(FieldSpec::new("winner", MergePolicy::ErrorOnConflict))
            .node(NodeSpec::new("x").writes(&["winner"]), noop())
            .node(NodeSpec::new("y").writes(&["winner"]), noop())
            .entry("x")
            .build();
        assert!(graph.is_ok());
    }

    #[test]
    fn dangling_static_edge_rejected() {
        let err = base()
            .node(NodeSpec::new("only"), noop())
            .edge("only", &["ghost"])
            .entry("only")
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::DanglingEdge { to, .. } if to == "ghost"));
    }

    #[test]
    fn edge_and_router_on_same_node_rejected() {
        let err = base()
            .node(NodeSpec::new("a-node"), noop())
            .node(NodeSpec::new("b-node"), noop())
            .edge("a-node", &["b-node"])
            .router("a-node", |_: &crate::state::StateSnapshot| Transition::Terminal)
            .entry("a-node")
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidConfig(_)));
    }

    #[test]
    fn zero_max_waves_rejected() {
        let config = GraphConfig {
            max_waves: 0,
            ..GraphConfig::default()
        };
        let err = base()
            .node(NodeSpec::new("only"), noop())
            .entry("only")
            .config(config)
            .build()
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidConfig(_)));
    }
}
