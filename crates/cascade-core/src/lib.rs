//! Cascade engine core: state container, node contracts, graph builder, and
//! the wave-based executor.
//!
//! This crate is the "brain" of the engine:
//! - `state` -- typed, mergeable state container with per-field merge policies
//! - `validate` -- output validator driving the retry loop
//! - `node` -- node work-function contract and corrective-hint retry carrier
//! - `collaborator` -- external call seam with transient/fatal error split
//! - `router` -- edge routing: state -> next node ids or terminal
//! - `graph` -- graph builder and build-time structural validation
//! - `context` -- per-run immutable dependency bundle
//! - `sink` -- observability sinks (tracing, broadcast event bus)
//! - `executor` -- wave loop: dispatch, fan-in, merge, route
//! - `definition` -- declarative YAML graph definitions

pub mod collaborator;
pub mod context;
pub mod definition;
pub mod executor;
pub mod graph;
pub mod node;
pub mod router;
pub mod sink;
pub mod state;
pub mod validate;

pub use collaborator::{BoxCollaborator, Collaborator, CollaboratorError};
pub use context::RunContext;
pub use definition::GraphDefinition;
pub use executor::{Executor, NodeDiagnostic, RunError, RunOutcome, RunReport};
pub use graph::{Graph, GraphBuilder};
pub use node::{Attempt, BoxNodeHandler, NodeError, NodeHandler, PartialOutput, handler_fn};
pub use router::{BoxRouter, Router, StaticRouter, Transition};
pub use sink::{EventBus, EventSink, MemorySink, NullSink, TracingSink};
pub use state::{StateContainer, StateError, StateSnapshot};
pub use validate::{ValidationFailure, ValidationProblem};

// ---------------------------------------------------------------------------
// End-to-end pipeline tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    //! Drives a research pipeline end to end: a request node fans out to
    //! three parallel report nodes that each call a collaborator, and a
    //! synthesis node joins their fields into a final report.

    use std::collections::BTreeMap;
    use std::sync::Arc;

    use serde_json::{Value, json};

    use cascade_types::event::RunEvent;

    use crate::collaborator::{BoxCollaborator, Collaborator, CollaboratorError};
    use crate::definition::parse_graph_yaml;
    use crate::executor::Executor;
    use crate::node::{NodeError, PartialOutput, handler_fn};
    use crate::sink::{EventBus, EventSink};
    use crate::state::StateSnapshot;

    const PIPELINE_YAML: &str = r#"
name: token-research
description: parallel research reports joined into one summary
entry: ingest
config:
  max_waves: 10
  max_concurrency: 4
fields:
  - name: request
    kind: string
  - name: market_data
    kind: string
  - name: social_report
    kind: string
  - name: web_report
    kind: string
  - name: final_report
    kind: string
nodes:
  - id: ingest
    writes: [request]
    output_schema:
      fields:
        - name: request
          kind: string
  - id: market-report
    reads: [request]
    writes: [market_data]
    retry:
      max_attempts: 3
      on_validation: corrective_hint
    output_schema:
      fields:
        - name: market_data
          kind: string
  - id: social-report
    reads: [request]
    writes: [social_report]
    output_schema:
      fields:
        - name: social_report
          kind: string
  - id: web-report
    reads: [request]
    writes: [web_report]
    output_schema:
      fields:
        - name: web_report
          kind: string
  - id: final-report
    reads: [market_data, social_report, web_report]
    writes: [final_report]
    output_schema:
      fields:
        - name: final_report
          kind: string
edges:
  - from: ingest
    to: [market-report, social-report, web-report]
  - from: market-report
    to: [final-report]
  - from: social-report
    to: [final-report]
  - from: web-report
    to: [final-report]
  - from: final-report
    to: []
"#;

    /// Scripted stand-in for a model endpoint: answers based on the
    /// "topic" the request names.
    struct ScriptedModel;

    impl Collaborator for ScriptedModel {
        fn name(&self) -> &str {
            "model"
        }

        async fn invoke(&self, request: Value) -> Result<Value, CollaboratorError> {
            let topic = request
                .get("topic")
                .and_then(Value::as_str)
                .ok_or_else(|| CollaboratorError::Fatal("request missing topic".to_string()))?;
            let token = request.get("token").and_then(Value::as_str).unwrap_or("?");
            Ok(json!(format!("{topic} findings for {token}")))
        }
    }

    fn report_handler(topic: &'static str, field: &'static str) -> crate::node::BoxNodeHandler {
        handler_fn(move |snapshot: StateSnapshot, _, ctx: crate::context::RunContext| {
            let token = snapshot
                .get("request")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            async move {
                let model = ctx
                    .collaborator("model")
                    .ok_or_else(|| NodeError::Fatal("model collaborator missing".to_string()))?;
                let reply = model
                    .invoke(json!({ "topic": topic, "token": token }))
                    .await?;
                Ok(PartialOutput::from([(field.to_string(), reply)]))
            }
        })
    }

    fn handlers() -> BTreeMap<String, crate::node::BoxNodeHandler> {
        let ingest = handler_fn(|_, _, _| async {
            Ok(PartialOutput::from([(
                "request".to_string(),
                json!("SOL"),
            )]))
        });
        let synth = handler_fn(|snapshot: StateSnapshot, _, _| {
            let joined = ["market_data", "social_report", "web_report"]
                .iter()
                .filter_map(|f| snapshot.get(f).and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("; ");
            async move {
                Ok(PartialOutput::from([(
                    "final_report".to_string(),
                    json!(joined),
                )]))
            }
        });

        BTreeMap::from([
            ("ingest".to_string(), ingest),
            (
                "market-report".to_string(),
                report_handler("market", "market_data"),
            ),
            (
                "social-report".to_string(),
                report_handler("social", "social_report"),
            ),
            ("web-report".to_string(), report_handler("web", "web_report")),
            ("final-report".to_string(), synth),
        ])
    }

    #[tokio::test]
    async fn research_pipeline_runs_end_to_end() {
        let graph = parse_graph_yaml(PIPELINE_YAML)
            .unwrap()
            .bind(handlers())
            .unwrap();

        let collaborators = BTreeMap::from([(
            "model".to_string(),
            BoxCollaborator::new(ScriptedModel),
        )]);

        let bus = EventBus::new(64);
        let mut events = bus.subscribe();
        let executor = Executor::with_sink(Arc::new(bus.clone()) as Arc<dyn EventSink>);

        let report = executor.run(&graph, BTreeMap::new(), collaborators).await;
        assert!(report.outcome.is_completed(), "{:?}", report.outcome);
        assert_eq!(report.waves, 3);

        let final_report = report
            .state
            .get("final_report")
            .and_then(Value::as_str)
            .unwrap();
        assert!(final_report.contains("market findings for SOL"));
        assert!(final_report.contains("social findings for SOL"));
        assert!(final_report.contains("web findings for SOL"));

        // Wave 2 must carry all three research nodes.
        let mut wave_two = None;
        while let Ok(event) = events.try_recv() {
            if let RunEvent::WaveStarted { wave: 2, node_ids, .. } = event {
                wave_two = Some(node_ids);
            }
        }
        let mut wave_two = wave_two.unwrap();
        wave_two.sort();
        assert_eq!(wave_two, vec!["market-report", "social-report", "web-report"]);
    }

    #[tokio::test]
    async fn research_pipeline_is_idempotent() {
        let mut reports = Vec::new();
        for _ in 0..2 {
            let graph = parse_graph_yaml(PIPELINE_YAML)
                .unwrap()
                .bind(handlers())
                .unwrap();
            let collaborators = BTreeMap::from([(
                "model".to_string(),
                BoxCollaborator::new(ScriptedModel),
            )]);
            let report = Executor::new()
                .run(&graph, BTreeMap::new(), collaborators)
                .await;
            reports.push(report);
        }

        let second = reports.pop().unwrap();
        let first = reports.pop().unwrap();
        assert!(first.outcome.is_completed(), "{:?}", first.outcome);
        assert!(second.outcome.is_completed(), "{:?}", second.outcome);
        assert_eq!(first.waves, second.waves);
        assert_eq!(first.state, second.state);
    }

    #[tokio::test]
    async fn missing_collaborator_fails_the_run() {
        let graph = parse_graph_yaml(PIPELINE_YAML)
            .unwrap()
            .bind(handlers())
            .unwrap();

        let report = Executor::new()
            .run(&graph, BTreeMap::new(), BTreeMap::new())
            .await;
        assert!(matches!(
            report.outcome,
            crate::executor::RunOutcome::Failed(_)
        ));
        // Ingest ran before the research wave failed.
        assert_eq!(report.state.get("request"), Some(&json!("SOL")));
    }
}
