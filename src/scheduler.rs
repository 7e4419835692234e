//! The single-threaded cooperative scheduler: one instance per run.
//!
//! The scheduler owns nothing global. It is handed the graph, the
//! collaborators (provider, broker, function bindings), the per-run recorder,
//! and a mutable [`RunState`]; it advances the graph one node at a time:
//!
//! 1. Pick the starting node from the named entry point.
//! 2. Enforce the visit cap — a capped node is a dead end that may still be
//!    covered by on-failure edges.
//! 3. Verify the memory-plane input precondition.
//! 4. Dispatch to the node executor; retry within the node's attempt budget.
//! 5. On success merge staged outputs atomically, on failure merge nothing.
//! 6. Record the decision/outcome pair, then evaluate outgoing edges.
//! 7. Suspend at pause nodes, complete at terminal nodes, fail on dead ends.
//!
//! Edge evaluation: on success, conditional edges whose predicate holds
//! against the post-merge memory plane are considered first, then
//! on-success/always edges; on failure only on-failure/always edges fire.
//! Each group is ordered by descending priority with ties broken by edge id
//! for determinism. Forward edges carry positive priority, feedback edges
//! negative.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::broker::ToolBroker;
use crate::executors::{
    self, ExecutorContext, ExecutorReport, FunctionRegistry, LoopLimits, NodeOutcome,
    ResumedConversation,
};
use crate::graph::predicate::Predicate;
use crate::graph::spec::{EdgeCondition, EdgeSpec, GraphSpec, NodeSpec};
use crate::memory::MemoryPlane;
use crate::message::Message;
use crate::provider::LlmProvider;
use crate::recorder::{DecisionOption, Recorder, RunMetrics};
use crate::types::{FailureKind, RunId, RunStatus, Severity};

#[derive(Debug, Error, Diagnostic)]
pub enum SchedulerError {
    #[error("graph {graph} has no entry point named {name}")]
    #[diagnostic(
        code(goalgraph::scheduler::unknown_entry_point),
        help("Declare the entry point in the graph-config block.")
    )]
    UnknownEntryPoint { graph: String, name: String },

    #[error("graph {graph} references undefined node {node}")]
    #[diagnostic(code(goalgraph::scheduler::unknown_node))]
    UnknownNode { graph: String, node: String },
}

/// Mutable state of one run, owned by its scheduler while driving.
#[derive(Clone, Debug)]
pub struct RunState {
    pub run_id: RunId,
    pub status: RunStatus,
    pub memory: MemoryPlane,
    pub visits: FxHashMap<String, u32>,
    /// Node the run is positioned at (the pause node while suspended).
    pub current_node: Option<String>,
    /// Payload the pause node emitted for the human, while suspended.
    pub pending_message: Option<String>,
    /// In-progress conversation at the suspension point, if any.
    pub transcript: Option<Vec<Message>>,
    /// Staged outputs of the most recent successful node, for `status`.
    pub last_output: Option<Value>,
    pub metrics: RunMetrics,
}

impl RunState {
    #[must_use]
    pub fn new(run_id: RunId, memory: MemoryPlane) -> Self {
        Self {
            run_id,
            status: RunStatus::Running,
            memory,
            visits: FxHashMap::default(),
            current_node: None,
            pending_message: None,
            transcript: None,
            last_output: None,
            metrics: RunMetrics::default(),
        }
    }

    fn visits_of(&self, node_id: &str) -> u32 {
        self.visits.get(node_id).copied().unwrap_or(0)
    }
}

/// How a `drive` call ended.
#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    Completed,
    Suspended { message: String },
    Failed { kind: FailureKind, narrative: String },
}

/// Collaborator bundle and policy for one run.
pub struct Scheduler {
    graph: Arc<GraphSpec>,
    provider: Option<Arc<dyn LlmProvider>>,
    broker: Option<Arc<ToolBroker>>,
    functions: Arc<FunctionRegistry>,
    recorder: Recorder,
    limits: LoopLimits,
    run_deadline: Duration,
    cancel: Arc<AtomicBool>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        graph: Arc<GraphSpec>,
        provider: Option<Arc<dyn LlmProvider>>,
        broker: Option<Arc<ToolBroker>>,
        functions: Arc<FunctionRegistry>,
        recorder: Recorder,
        limits: LoopLimits,
        run_deadline: Duration,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            graph,
            provider,
            broker,
            functions,
            recorder,
            limits,
            run_deadline,
            cancel,
        }
    }

    /// Drives the run from the named entry point until it completes, fails,
    /// or suspends. `resumed` carries a continued conversation when
    /// re-entering a client-facing pause node.
    #[instrument(skip(self, state, resumed), fields(run = %state.run_id, entry = entry_name))]
    pub async fn drive(
        &self,
        state: &mut RunState,
        entry_name: &str,
        mut resumed: Option<ResumedConversation>,
    ) -> Result<RunOutcome, SchedulerError> {
        let started = Instant::now();
        state.status = RunStatus::Running;
        state.pending_message = None;

        if state.current_node.is_none() {
            let entry = self.graph.entry_point(entry_name).ok_or_else(|| {
                SchedulerError::UnknownEntryPoint {
                    graph: self.graph.id.clone(),
                    name: entry_name.to_string(),
                }
            })?;
            state.current_node = Some(entry.to_string());
        }

        // The decision whose outcome is the next node's execution result.
        let mut pending_decision = self.recorder.decision(
            state.current_node.as_deref().unwrap_or_default(),
            &format!("enter graph {} at entry point {entry_name}", self.graph.id),
            vec![],
            state.current_node.as_deref().unwrap_or_default(),
            "caller-selected entry point",
        );

        loop {
            // Safe point: cancellation and the per-run deadline are observed
            // before any new node is scheduled.
            if self.cancel.load(Ordering::SeqCst) {
                return Ok(self.fail_run(state, FailureKind::Cancelled, "run cancelled by host"));
            }
            if started.elapsed() > self.run_deadline {
                return Ok(self.fail_run(state, FailureKind::Timeout, "per-run deadline expired"));
            }

            let node_id = state
                .current_node
                .clone()
                .expect("scheduler positioned on a node");
            let node = self.graph.node(&node_id).ok_or_else(|| {
                SchedulerError::UnknownNode {
                    graph: self.graph.id.clone(),
                    node: node_id.clone(),
                }
            })?;

            // Visit cap: a capped node is a dead end covered only by failure
            // edges.
            if node.max_visits > 0 && state.visits_of(&node_id) >= node.max_visits {
                self.recorder.problem(
                    Severity::Critical,
                    Some(&node_id),
                    &format!(
                        "node {} reached its visit cap of {}",
                        node.name, node.max_visits
                    ),
                    Some("raise max_visits or add an on-failure edge"),
                );
                match self.select_edge(node, false, &state.memory.snapshot()) {
                    Some(selected) => {
                        pending_decision = self.record_edge_decision(node, &selected, false);
                        state.current_node = Some(selected.edge.target.clone());
                        continue;
                    }
                    None => {
                        return Ok(self.fail_run(
                            state,
                            FailureKind::VisitCapExceeded,
                            &format!("node {} exceeded its visit cap", node.name),
                        ));
                    }
                }
            }

            // Input precondition. A violated contract terminates the run.
            if let Err(e) = state.memory.verify_inputs(node) {
                self.recorder
                    .problem(Severity::Critical, Some(&node_id), &e.to_string(), None);
                return Ok(self.fail_run(state, FailureKind::MissingInput, &e.to_string()));
            }

            // Dispatch, with the node's intra-visit retry budget.
            *state.visits.entry(node_id.clone()).or_insert(0) += 1;
            info!(node = %node_id, visit = state.visits_of(&node_id), "executing node");

            let node_started = Instant::now();
            let report = self.execute_with_retries(node, state, resumed.take()).await;
            let latency_ms = node_started.elapsed().as_millis() as u64;

            state.metrics.steps_executed += 1;
            state.metrics.total_latency_ms += latency_ms;
            state.metrics.total_tokens.absorb(report.tokens);

            match report.outcome {
                NodeOutcome::Suspend(payload) => {
                    self.recorder.outcome(
                        &pending_decision,
                        true,
                        json!({"awaiting": "human input"}),
                        &format!("node {} suspended awaiting input", node.name),
                        latency_ms,
                        report.tokens,
                    );
                    state.status = RunStatus::Suspended;
                    state.pending_message = Some(payload.message.clone());
                    state.transcript = Some(payload.transcript);
                    debug!(node = %node_id, "run suspended");
                    return Ok(RunOutcome::Suspended {
                        message: payload.message,
                    });
                }

                NodeOutcome::Success(staged) => {
                    let merged = match state.memory.merge(node, staged) {
                        Ok(written) => written,
                        Err(e) => {
                            // Contract violation surfaces as a node failure;
                            // failure edges decide.
                            self.recorder.problem(
                                Severity::Critical,
                                Some(&node_id),
                                &e.to_string(),
                                None,
                            );
                            self.recorder.outcome(
                                &pending_decision,
                                false,
                                json!({"error": e.to_string()}),
                                "required output missing at merge",
                                latency_ms,
                                report.tokens,
                            );
                            match self.select_edge(node, false, &state.memory.snapshot()) {
                                Some(selected) => {
                                    pending_decision =
                                        self.record_edge_decision(node, &selected, false);
                                    state.current_node = Some(selected.edge.target.clone());
                                    continue;
                                }
                                None => {
                                    return Ok(self.fail_run(
                                        state,
                                        FailureKind::MissingRequiredOutput,
                                        &e.to_string(),
                                    ));
                                }
                            }
                        }
                    };

                    let outputs: FxHashMap<String, Value> = merged
                        .iter()
                        .filter_map(|k| state.memory.read(k).map(|v| (k.clone(), v.clone())))
                        .collect();
                    state.last_output = Some(json!(outputs
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect::<std::collections::BTreeMap<_, _>>()));

                    self.recorder.outcome(
                        &pending_decision,
                        true,
                        state.last_output.clone().unwrap_or(Value::Null),
                        &format!("node {} wrote {} key(s)", node.name, merged.len()),
                        latency_ms,
                        report.tokens,
                    );

                    // A completed pause node materializes the run to storage;
                    // resume re-enters through its `_resume` entry point.
                    if self.graph.is_pause_node(&node_id) {
                        let message = pause_message(&outputs);
                        state.status = RunStatus::Suspended;
                        state.pending_message = Some(message.clone());
                        debug!(node = %node_id, "pause node completed; run suspended");
                        return Ok(RunOutcome::Suspended { message });
                    }

                    if self.graph.is_terminal_node(&node_id) {
                        state.status = RunStatus::Completed;
                        self.recorder.run_ended(
                            true,
                            &format!(
                                "completed at terminal node {} after {} step(s)",
                                node.name, state.metrics.steps_executed
                            ),
                            &state.memory.snapshot(),
                            state.metrics,
                        );
                        return Ok(RunOutcome::Completed);
                    }

                    match self.select_edge(node, true, &state.memory.snapshot()) {
                        Some(selected) => {
                            pending_decision = self.record_edge_decision(node, &selected, true);
                            state.current_node = Some(selected.edge.target.clone());
                        }
                        None => {
                            return Ok(self.fail_run(
                                state,
                                FailureKind::DeadEnd,
                                &format!("no edge fires after node {}", node.name),
                            ));
                        }
                    }
                }

                NodeOutcome::Failure(error) => {
                    let kind = error.failure_kind();
                    self.recorder.problem(
                        Severity::Critical,
                        Some(&node_id),
                        &error.to_string(),
                        None,
                    );
                    self.recorder.outcome(
                        &pending_decision,
                        false,
                        json!({"error": error.to_string()}),
                        &format!("node {} failed", node.name),
                        latency_ms,
                        report.tokens,
                    );

                    match self.select_edge(node, false, &state.memory.snapshot()) {
                        Some(selected) => {
                            pending_decision = self.record_edge_decision(node, &selected, false);
                            state.current_node = Some(selected.edge.target.clone());
                        }
                        None => {
                            return Ok(self.fail_run(state, kind, &error.to_string()));
                        }
                    }
                }
            }
        }
    }

    async fn execute_with_retries(
        &self,
        node: &NodeSpec,
        state: &RunState,
        resumed: Option<ResumedConversation>,
    ) -> ExecutorReport {
        let mut attempt = 1u32;
        let mut resumed = resumed;
        let goal_text = self.graph.goal.as_ref().map(|g| g.to_prompt_context());
        loop {
            let ctx = ExecutorContext {
                node,
                view: state.memory.input_view(node),
                goal_context: goal_text.as_deref(),
                provider: self.provider.clone(),
                broker: self.broker.clone(),
                functions: &self.functions,
                limits: self.limits,
                resumed: resumed.take(),
            };

            let report = executors::execute(ctx).await;
            match &report.outcome {
                NodeOutcome::Failure(error) if attempt < node.max_attempts => {
                    self.recorder.problem(
                        Severity::Warning,
                        Some(&node.id),
                        &format!("attempt {attempt} failed, retrying: {error}"),
                        None,
                    );
                    attempt += 1;
                }
                _ => return report,
            }
        }
    }

    /// Picks the next edge for the observed outcome, if any fires.
    fn select_edge(
        &self,
        node: &NodeSpec,
        success: bool,
        memory: &FxHashMap<String, Value>,
    ) -> Option<SelectedEdge<'_>> {
        let outgoing = self.graph.outgoing_edges(&node.id);
        if outgoing.is_empty() {
            return None;
        }

        let mut ordered: Vec<&EdgeSpec> = outgoing.clone();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        if success {
            // Predicate-gated edges first: a conditional route is a more
            // specific statement than a blanket on-success edge.
            for edge in ordered.iter().copied().filter(|e| e.condition == EdgeCondition::Conditional) {
                if self.predicate_fires(edge, memory) {
                    return Some(SelectedEdge {
                        edge,
                        candidates: outgoing.clone(),
                        reasoning: format!(
                            "conditional predicate `{}` held at priority {}",
                            edge.predicate.as_deref().unwrap_or_default(),
                            edge.priority
                        ),
                    });
                }
            }
            for edge in ordered.iter().copied().filter(|e| {
                matches!(e.condition, EdgeCondition::OnSuccess | EdgeCondition::Always)
            }) {
                return Some(SelectedEdge {
                    edge,
                    candidates: outgoing.clone(),
                    reasoning: format!(
                        "{:?} edge fired at priority {}",
                        edge.condition, edge.priority
                    ),
                });
            }
            None
        } else {
            for edge in ordered.iter().copied().filter(|e| {
                matches!(e.condition, EdgeCondition::OnFailure | EdgeCondition::Always)
            }) {
                return Some(SelectedEdge {
                    edge,
                    candidates: outgoing.clone(),
                    reasoning: format!(
                        "{:?} edge fired at priority {} after failure",
                        edge.condition, edge.priority
                    ),
                });
            }
            None
        }
    }

    fn predicate_fires(&self, edge: &EdgeSpec, memory: &FxHashMap<String, Value>) -> bool {
        let Some(text) = edge.predicate.as_deref() else {
            return false;
        };
        match Predicate::parse(text) {
            Ok(p) => p.evaluate(memory),
            Err(e) => {
                // Validation admits only parseable predicates; a miss here
                // means the graph bypassed the loader.
                warn!(edge = %edge.id, error = %e, "unparseable predicate; edge does not fire");
                false
            }
        }
    }

    fn record_edge_decision(
        &self,
        node: &NodeSpec,
        selected: &SelectedEdge<'_>,
        success: bool,
    ) -> String {
        let options: Vec<DecisionOption> = selected
            .candidates
            .iter()
            .map(|e| {
                DecisionOption::new(
                    &e.id,
                    &format!("{} -> {} (priority {})", e.source, e.target, e.priority),
                    &format!("{:?}", e.condition),
                )
            })
            .collect();
        self.recorder.decision(
            &node.id,
            &format!(
                "advance from {} after {}",
                node.name,
                if success { "success" } else { "failure" }
            ),
            options,
            &selected.edge.id,
            &selected.reasoning,
        )
    }

    fn fail_run(&self, state: &mut RunState, kind: FailureKind, narrative: &str) -> RunOutcome {
        state.status = RunStatus::Failed { kind };
        self.recorder.run_ended(
            false,
            &format!("{kind}: {narrative}"),
            &state.memory.snapshot(),
            state.metrics,
        );
        info!(run = %state.run_id, %kind, "run failed");
        RunOutcome::Failed {
            kind,
            narrative: narrative.to_string(),
        }
    }
}

struct SelectedEdge<'a> {
    edge: &'a EdgeSpec,
    candidates: Vec<&'a EdgeSpec>,
    reasoning: String,
}

/// Payload a non-client-facing pause node emits to the human: its `message`
/// output when present, otherwise its outputs serialized.
fn pause_message(outputs: &FxHashMap<String, Value>) -> String {
    match outputs.get("message") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => json!(outputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect::<std::collections::BTreeMap<_, _>>())
        .to_string(),
    }
}
