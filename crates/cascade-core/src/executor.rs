//! Wave-based graph executor.
//!
//! Execution alternates between two phases until a terminal signal:
//!
//! 1. Dispatch: every node in the current frontier is spawned onto a
//!    `tokio::JoinSet`, bounded by a semaphore, each holding the same
//!    immutable pre-wave snapshot.
//! 2. Settle: the executor joins the whole wave, merges the validated
//!    outputs into the state container (sole-writer rule), then asks the
//!    completed nodes' routers what runs next.
//!
//! Retry, output validation, and per-attempt timeouts live inside the node
//! task; nothing a node does between attempts ever touches shared state.
//! Cyclic graphs are legal and bounded by `max_waves`; exceeding the budget
//! fails the run with a divergence error rather than looping forever.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use cascade_types::event::{AttemptOutcome, RunEvent};
use cascade_types::graph::{FailurePolicy, NodeSpec, ValidationRetry};
use cascade_types::status::RunStatus;

use crate::collaborator::BoxCollaborator;
use crate::context::RunContext;
use crate::graph::Graph;
use crate::node::{Attempt, BoxNodeHandler, NodeError, PartialOutput};
use crate::router::{Transition, combine};
use crate::sink::{EventSink, TracingSink};
use crate::state::{StateContainer, StateError};
use crate::validate::{ValidationFailure, validate_output};

// ---------------------------------------------------------------------------
// RunError / RunOutcome / RunReport
// ---------------------------------------------------------------------------

/// Fatal run-level errors.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    /// A node was dispatched while a field it reads is absent.
    #[error("node '{node}' requires field '{field}' which is absent")]
    Precondition { node: String, field: String },

    /// A node exhausted its attempts without producing a valid output.
    #[error("node '{node}' output invalid after {attempts} attempt(s): {failure}")]
    OutputValidation {
        node: String,
        attempts: u32,
        failure: ValidationFailure,
    },

    /// A node failed terminally (fatal error, or transient errors exhausted).
    #[error("node '{node}' failed after {attempts} attempt(s): {reason}")]
    NodeFailed {
        node: String,
        attempts: u32,
        reason: String,
    },

    /// A router proposed a node id that is not registered.
    #[error("router of node '{node}' targets unknown node '{target}'")]
    UnknownRouteTarget { node: String, target: String },

    /// Seeding or merging state failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// The frontier was still non-empty after the wave budget.
    #[error("run exceeded the wave budget of {max_waves} waves")]
    Divergence { max_waves: u32 },
}

/// Terminal disposition of a run.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Every routing proposal was terminal.
    Completed,
    /// A fatal error ended the run.
    Failed(RunError),
    /// The cancellation signal ended the run.
    Aborted,
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn status(&self) -> RunStatus {
        match self {
            Self::Completed => RunStatus::Completed,
            Self::Failed(_) => RunStatus::Failed,
            Self::Aborted => RunStatus::Aborted,
        }
    }
}

/// A node that failed without failing the whole run (best-effort mode).
#[derive(Debug, Clone)]
pub struct NodeDiagnostic {
    pub node_id: String,
    pub wave: u32,
    pub error: RunError,
}

/// Everything a run produced.
///
/// `state` is the best-available state: even on `Failed` or `Aborted` it
/// holds whatever was merged before the run ended.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub outcome: RunOutcome,
    pub state: BTreeMap<String, Value>,
    pub diagnostics: Vec<NodeDiagnostic>,
    pub waves: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Runs graphs. One executor can drive many concurrent runs; each live run
/// is registered so it can be cancelled by id.
pub struct Executor {
    sink: Arc<dyn EventSink>,
    live_runs: DashMap<Uuid, CancellationToken>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

impl Executor {
    /// Executor that logs events through tracing.
    pub fn new() -> Self {
        Self::with_sink(Arc::new(TracingSink))
    }

    pub fn with_sink(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            live_runs: DashMap::new(),
        }
    }

    /// Request cancellation of a live run. Returns false if the run is not
    /// live (unknown id, or already finished).
    pub fn cancel(&self, run_id: Uuid) -> bool {
        match self.live_runs.get(&run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Execute a graph from the given initial state.
    pub async fn run(
        &self,
        graph: &Graph,
        initial: BTreeMap<String, Value>,
        collaborators: BTreeMap<String, BoxCollaborator>,
    ) -> RunReport {
        self.run_with_token(graph, initial, collaborators, CancellationToken::new())
            .await
    }

    /// Execute a graph under a caller-held cancellation token.
    pub async fn run_with_token(
        &self,
        graph: &Graph,
        initial: BTreeMap<String, Value>,
        collaborators: BTreeMap<String, BoxCollaborator>,
        token: CancellationToken,
    ) -> RunReport {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();
        self.live_runs.insert(run_id, token.clone());

        let (outcome, state, diagnostics, waves) = self
            .drive(graph, initial, Arc::new(collaborators), run_id, &token)
            .await;

        self.live_runs.remove(&run_id);

        match &outcome {
            RunOutcome::Completed => self.sink.emit(&RunEvent::RunCompleted { run_id, waves }),
            RunOutcome::Failed(error) => self.sink.emit(&RunEvent::RunFailed {
                run_id,
                waves,
                error: error.to_string(),
            }),
            RunOutcome::Aborted => self.sink.emit(&RunEvent::RunAborted { run_id, waves }),
        }

        RunReport {
            run_id,
            outcome,
            state,
            diagnostics,
            waves,
            started_at,
            completed_at: Utc::now(),
        }
    }

    async fn drive(
        &self,
        graph: &Graph,
        initial: BTreeMap<String, Value>,
        collaborators: Arc<BTreeMap<String, BoxCollaborator>>,
        run_id: Uuid,
        token: &CancellationToken,
    ) -> (RunOutcome, BTreeMap<String, Value>, Vec<NodeDiagnostic>, u32) {
        let config = *graph.config();
        let fail_fast = config.failure_policy == FailurePolicy::FailFast;

        let mut state = StateContainer::new(graph.fields());
        if let Err(err) = state.seed(initial) {
            return (RunOutcome::Failed(err.into()), BTreeMap::new(), Vec::new(), 0);
        }

        self.sink.emit(&RunEvent::RunStarted {
            run_id,
            graph: graph.name().to_string(),
        });

        let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
        let mut frontier: Vec<String> = vec![graph.entry().to_string()];
        let mut diagnostics: Vec<NodeDiagnostic> = Vec::new();
        let mut waves: u32 = 0;

        let outcome = loop {
            if token.is_cancelled() {
                break RunOutcome::Aborted;
            }
            if waves >= config.max_waves {
                break RunOutcome::Failed(RunError::Divergence {
                    max_waves: config.max_waves,
                });
            }
            waves += 1;
            let wave = waves;

            self.sink.emit(&RunEvent::WaveStarted {
                run_id,
                wave,
                node_ids: frontier.clone(),
            });
            debug!(run_id = %run_id, wave, nodes = ?frontier, "dispatching wave");

            let snapshot = state.snapshot();
            // Child token: cancelling it stops this wave's siblings without
            // touching the run-level token.
            let wave_token = token.child_token();
            let ctx = RunContext::new(
                run_id,
                wave_token.clone(),
                Arc::clone(&self.sink),
                Arc::clone(&collaborators),
            );

            // Precondition checks happen at dispatch, against the pre-wave
            // snapshot, and are never retried.
            let mut failures: Vec<(String, RunError)> = Vec::new();
            let mut runnable: Vec<&str> = Vec::new();
            for node_id in &frontier {
                let Some(entry) = graph.node(node_id) else {
                    failures.push((
                        node_id.clone(),
                        RunError::UnknownRouteTarget {
                            node: node_id.clone(),
                            target: node_id.clone(),
                        },
                    ));
                    continue;
                };
                match entry.spec.reads.iter().find(|f| !snapshot.is_set(f)) {
                    Some(missing) => {
                        let error = RunError::Precondition {
                            node: node_id.clone(),
                            field: missing.clone(),
                        };
                        self.sink.emit(&RunEvent::NodeAttempt {
                            run_id,
                            wave,
                            node_id: node_id.clone(),
                            attempt: 1,
                            duration_ms: 0,
                            outcome: AttemptOutcome::Failed,
                            attributes: BTreeMap::from([(
                                "error".to_string(),
                                Value::String(error.to_string()),
                            )]),
                        });
                        failures.push((node_id.clone(), error));
                    }
                    None => runnable.push(node_id),
                }
            }

            if fail_fast {
                if let Some((_, error)) = failures.into_iter().next() {
                    break RunOutcome::Failed(error);
                }
                failures = Vec::new();
            }

            let mut join_set: JoinSet<(String, NodeTaskResult)> = JoinSet::new();
            for node_id in &runnable {
                // Runnable ids were resolved above.
                let Some(entry) = graph.node(node_id) else {
                    continue;
                };
                let spec = entry.spec.clone();
                let handler = entry.handler.clone();
                let snapshot = snapshot.clone();
                let ctx = ctx.clone();
                let semaphore = Arc::clone(&semaphore);
                join_set.spawn(async move {
                    let _permit = match semaphore.acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => return (spec.id.clone(), NodeTaskResult::Cancelled),
                    };
                    let result = run_node(&spec, &handler, snapshot, &ctx, wave).await;
                    (spec.id.clone(), result)
                });
            }

            let mut outputs: BTreeMap<String, PartialOutput> = BTreeMap::new();
            while let Some(joined) = join_set.join_next().await {
                match joined {
                    Ok((node_id, NodeTaskResult::Done(output))) => {
                        outputs.insert(node_id, output);
                    }
                    Ok((node_id, NodeTaskResult::Failed(error))) => {
                        if fail_fast {
                            wave_token.cancel();
                        }
                        failures.push((node_id, error));
                    }
                    Ok((_, NodeTaskResult::Cancelled)) => {}
                    Err(join_err) => {
                        if fail_fast {
                            wave_token.cancel();
                        }
                        failures.push((
                            String::new(),
                            RunError::NodeFailed {
                                node: String::new(),
                                attempts: 0,
                                reason: format!("task join error: {join_err}"),
                            },
                        ));
                    }
                }
            }

            if token.is_cancelled() {
                // Run-level cancellation observed mid-wave: nothing from this
                // wave is merged.
                break RunOutcome::Aborted;
            }

            if fail_fast {
                if let Some((_, error)) = failures.into_iter().next() {
                    break RunOutcome::Failed(error);
                }
                failures = Vec::new();
            }

            let merged_fields = match state.merge_wave(&outputs) {
                Ok(fields) => fields,
                Err(err) => break RunOutcome::Failed(err.into()),
            };
            self.sink.emit(&RunEvent::WaveMerged {
                run_id,
                wave,
                merged_fields,
            });

            for (node_id, error) in failures {
                diagnostics.push(NodeDiagnostic {
                    node_id,
                    wave,
                    error,
                });
            }

            // Routing: each completed node proposes successors from the
            // post-merge snapshot; terminal only wins unanimously.
            let post = state.snapshot();
            let mut transitions = Vec::with_capacity(outputs.len());
            let mut route_error = None;
            for node_id in outputs.keys() {
                let Some(entry) = graph.node(node_id) else {
                    continue;
                };
                let transition = match entry.router.as_ref().or(graph.global_router()) {
                    Some(router) => router.route(&post),
                    None => Transition::Terminal,
                };
                if let Transition::To(targets) = &transition {
                    if let Some(bad) = targets.iter().find(|t| graph.node(t).is_none()) {
                        route_error = Some(RunError::UnknownRouteTarget {
                            node: node_id.clone(),
                            target: bad.clone(),
                        });
                        break;
                    }
                }
                transitions.push(transition);
            }
            if let Some(error) = route_error {
                break RunOutcome::Failed(error);
            }

            match combine(&transitions) {
                Transition::Terminal => break RunOutcome::Completed,
                Transition::To(next) => frontier = next,
            }
        };

        (outcome, state.into_values(), diagnostics, waves)
    }
}

// ---------------------------------------------------------------------------
// Node task
// ---------------------------------------------------------------------------

enum NodeTaskResult {
    Done(PartialOutput),
    Failed(RunError),
    Cancelled,
}

enum AttemptResult {
    Finished(Result<PartialOutput, NodeError>),
    TimedOut,
    Cancelled,
}

/// One node's full attempt loop: timeout, validation, retry with optional
/// corrective hint, fixed backoff between attempts.
async fn run_node(
    spec: &NodeSpec,
    handler: &BoxNodeHandler,
    snapshot: crate::state::StateSnapshot,
    ctx: &RunContext,
    wave: u32,
) -> NodeTaskResult {
    let max_attempts = spec.retry.max_attempts.max(1);
    let mut hint: Option<String> = None;

    for number in 1..=max_attempts {
        if ctx.is_cancelled() {
            emit_attempt(ctx, spec, wave, number, 0, AttemptOutcome::Cancelled, None);
            return NodeTaskResult::Cancelled;
        }

        let attempt = if number == 1 {
            Attempt::first(max_attempts)
        } else {
            Attempt::retry(number, max_attempts, hint.take())
        };
        let last = number == max_attempts;
        let start = Instant::now();

        let result = tokio::select! {
            _ = ctx.cancelled() => AttemptResult::Cancelled,
            timed = tokio::time::timeout(
                spec.timeout(),
                handler.run(snapshot.clone(), attempt, ctx.clone()),
            ) => match timed {
                Ok(inner) => AttemptResult::Finished(inner),
                Err(_) => AttemptResult::TimedOut,
            },
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            AttemptResult::Cancelled => {
                emit_attempt(ctx, spec, wave, number, duration_ms, AttemptOutcome::Cancelled, None);
                return NodeTaskResult::Cancelled;
            }
            AttemptResult::Finished(Ok(output)) => match validate_output(spec, &output) {
                Ok(()) => {
                    emit_attempt(ctx, spec, wave, number, duration_ms, AttemptOutcome::Succeeded, None);
                    return NodeTaskResult::Done(output);
                }
                Err(failure) => {
                    if last {
                        emit_attempt(
                            ctx,
                            spec,
                            wave,
                            number,
                            duration_ms,
                            AttemptOutcome::Failed,
                            Some(failure.to_string()),
                        );
                        return NodeTaskResult::Failed(RunError::OutputValidation {
                            node: spec.id.clone(),
                            attempts: max_attempts,
                            failure,
                        });
                    }
                    if spec.retry.on_validation == ValidationRetry::CorrectiveHint {
                        hint = Some(failure.hint());
                    }
                    emit_attempt(
                        ctx,
                        spec,
                        wave,
                        number,
                        duration_ms,
                        AttemptOutcome::Retrying,
                        Some(failure.to_string()),
                    );
                }
            },
            AttemptResult::Finished(Err(NodeError::Fatal(reason))) => {
                emit_attempt(
                    ctx,
                    spec,
                    wave,
                    number,
                    duration_ms,
                    AttemptOutcome::Failed,
                    Some(reason.clone()),
                );
                return NodeTaskResult::Failed(RunError::NodeFailed {
                    node: spec.id.clone(),
                    attempts: number,
                    reason,
                });
            }
            AttemptResult::Finished(Err(NodeError::Transient(reason))) => {
                if last {
                    emit_attempt(
                        ctx,
                        spec,
                        wave,
                        number,
                        duration_ms,
                        AttemptOutcome::Failed,
                        Some(reason.clone()),
                    );
                    return NodeTaskResult::Failed(RunError::NodeFailed {
                        node: spec.id.clone(),
                        attempts: max_attempts,
                        reason,
                    });
                }
                emit_attempt(ctx, spec, wave, number, duration_ms, AttemptOutcome::Retrying, Some(reason));
            }
            AttemptResult::TimedOut => {
                let reason = format!("attempt timed out after {:?}", spec.timeout());
                if last {
                    emit_attempt(
                        ctx,
                        spec,
                        wave,
                        number,
                        duration_ms,
                        AttemptOutcome::Failed,
                        Some(reason.clone()),
                    );
                    return NodeTaskResult::Failed(RunError::NodeFailed {
                        node: spec.id.clone(),
                        attempts: max_attempts,
                        reason,
                    });
                }
                emit_attempt(ctx, spec, wave, number, duration_ms, AttemptOutcome::Retrying, Some(reason));
            }
        }

        if spec.retry.backoff_ms > 0 {
            tokio::time::sleep(spec.retry.backoff()).await;
        }
    }

    // The loop always returns from its last iteration.
    NodeTaskResult::Cancelled
}

fn emit_attempt(
    ctx: &RunContext,
    spec: &NodeSpec,
    wave: u32,
    attempt: u32,
    duration_ms: u64,
    outcome: AttemptOutcome,
    error: Option<String>,
) {
    let mut attributes = BTreeMap::new();
    if let Some(error) = error {
        attributes.insert("error".to_string(), Value::String(error));
    }
    ctx.emit(RunEvent::NodeAttempt {
        run_id: ctx.run_id(),
        wave,
        node_id: spec.id.clone(),
        attempt,
        duration_ms,
        outcome,
        attributes,
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
