mod common;

use common::fixtures::*;
use common::*;

use serde_json::json;

use goalgraph::executors::{FunctionRegistry, FunctionError};
use goalgraph::graph::spec::{EdgeCondition, EdgeSpec, GraphSpec, NodeSpec};
use goalgraph::memory::StagedOutputs;
use goalgraph::recorder::RunEventKind;
use goalgraph::scheduler::RunOutcome;
use goalgraph::types::{FailureKind, RunStatus};

#[tokio::test]
async fn linear_graph_runs_to_completion() {
    let (state, outcome, _events) = drive(
        linear_graph(),
        linear_functions(),
        None,
        None,
        &[("x", json!(1))],
    )
    .await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(state.memory.read("y"), Some(&json!(2)));
    assert_eq!(state.memory.read("z"), Some(&json!(3)));
    assert_eq!(state.memory.read("out"), Some(&json!("ok")));
    assert_eq!(state.visits.get("a"), Some(&1));
    assert_eq!(state.visits.get("b"), Some(&1));
    assert_eq!(state.visits.get("c"), Some(&1));
}

#[tokio::test]
async fn failure_routes_through_on_failure_edge() {
    let (functions, counters) = failure_functions();
    let (state, outcome, _events) = drive(failure_graph(), functions, None, None, &[]).await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(state.status, RunStatus::Completed);
    assert_eq!(counters.b_runs.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(counters.e_runs.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn feedback_loop_revisits_under_cap_then_reports() {
    let (state, outcome, _events) = drive(
        feedback_graph(),
        feedback_functions(),
        None,
        None,
        &[("topic", json!("t"))],
    )
    .await;

    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(state.visits.get("intake"), Some(&1));
    assert_eq!(state.visits.get("research"), Some(&3));
    assert_eq!(state.visits.get("review"), Some(&3));
    assert_eq!(state.visits.get("report"), Some(&1));
    assert_eq!(state.memory.read("report_out"), Some(&json!("final")));
}

#[tokio::test]
async fn visit_cap_exhaustion_fails_the_run() {
    let (state, outcome, _events) =
        drive(visit_cap_graph(), visit_cap_functions(), None, None, &[]).await;

    assert_eq!(state.visits.get("a"), Some(&2));
    assert!(matches!(
        outcome,
        RunOutcome::Failed {
            kind: FailureKind::VisitCapExceeded,
            ..
        }
    ));
    assert_eq!(
        state.status,
        RunStatus::Failed {
            kind: FailureKind::VisitCapExceeded
        }
    );
}

#[tokio::test]
async fn missing_required_input_terminates_the_run() {
    // Linear graph started without its payload key; node `a` declares `x`.
    let (state, outcome, _events) =
        drive(linear_graph(), linear_functions(), None, None, &[]).await;

    assert!(matches!(
        outcome,
        RunOutcome::Failed {
            kind: FailureKind::MissingInput,
            ..
        }
    ));
    // Nothing executed, nothing merged.
    assert!(state.visits.is_empty());
    assert!(!state.memory.contains("y"));
}

#[tokio::test]
async fn success_with_no_firing_edge_is_a_dead_end() {
    let graph = GraphSpec::new("dead-end", "1")
        .with_node(NodeSpec::function("a", "A"))
        .with_node(NodeSpec::function("b", "B"))
        // Only a failure edge exists; a successful `a` has nowhere to go.
        .with_edge(EdgeSpec::new("e-ab", "a", "b", EdgeCondition::OnFailure, 1))
        .with_entry_point("start", "a")
        .with_terminal_node("b");
    let mut functions = FunctionRegistry::new();
    functions.register_fn("a", |_| Ok(StagedOutputs::default()));
    functions.register_fn("b", |_| Ok(StagedOutputs::default()));

    let (_state, outcome, _events) = drive(graph, functions, None, None, &[]).await;
    assert!(matches!(
        outcome,
        RunOutcome::Failed {
            kind: FailureKind::DeadEnd,
            ..
        }
    ));
}

#[tokio::test]
async fn missing_required_output_surfaces_as_node_failure() {
    let graph = GraphSpec::new("bad-output", "1")
        .with_node(NodeSpec::function("a", "A").with_outputs(["y"]))
        .with_node(NodeSpec::function("rescue", "Rescue"))
        .with_edge(EdgeSpec::new("e-ar", "a", "rescue", EdgeCondition::OnFailure, 1))
        .with_entry_point("start", "a")
        .with_terminal_node("rescue");
    let mut functions = FunctionRegistry::new();
    // Declares `y` but never stages it.
    functions.register_fn("a", |_| Ok(StagedOutputs::default()));
    functions.register_fn("rescue", |_| Ok(StagedOutputs::default()));

    let (state, outcome, _events) = drive(graph, functions, None, None, &[]).await;
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(state.status, RunStatus::Completed);
    assert!(!state.memory.contains("y"));
}

#[tokio::test]
async fn retry_budget_reruns_failing_node_within_one_visit() {
    let attempts = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let graph = GraphSpec::new("retry", "1")
        .with_node(NodeSpec::function("flaky", "Flaky").with_outputs(["ok"]).with_max_attempts(3))
        .with_entry_point("start", "flaky")
        .with_terminal_node("flaky");
    let mut functions = FunctionRegistry::new();
    {
        let attempts = attempts.clone();
        functions.register_fn("flaky", move |_| {
            let n = attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            if n < 3 {
                Err(FunctionError::new("transient"))
            } else {
                let mut out = StagedOutputs::default();
                out.insert("ok".to_string(), json!(true));
                Ok(out)
            }
        });
    }

    let (state, outcome, _events) = drive(graph, functions, None, None, &[]).await;
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(attempts.load(std::sync::atomic::Ordering::SeqCst), 3);
    // Three attempts, one visit.
    assert_eq!(state.visits.get("flaky"), Some(&1));
}

#[tokio::test]
async fn router_output_drives_conditional_edges() {
    let graph = GraphSpec::new("routed", "1")
        .with_node(NodeSpec::function("score", "Score").with_outputs(["quality"]))
        .with_node(
            NodeSpec::router("route", "Route")
                .with_inputs(["quality"])
                .with_outputs(["verdict"])
                .with_route_rule("quality >= 0.8", "ship")
                .with_route_default("rework"),
        )
        .with_node(NodeSpec::function("ship", "Ship"))
        .with_node(NodeSpec::function("rework", "Rework"))
        .with_edge(EdgeSpec::new("e-sr", "score", "route", EdgeCondition::OnSuccess, 1))
        .with_edge(EdgeSpec::conditional("e-ship", "route", "ship", "verdict == 'ship'", 2))
        .with_edge(EdgeSpec::conditional("e-rework", "route", "rework", "verdict == 'rework'", 1))
        .with_entry_point("start", "score")
        .with_terminal_node("ship")
        .with_terminal_node("rework");

    let mut functions = FunctionRegistry::new();
    functions.register_fn("score", |_| {
        let mut out = StagedOutputs::default();
        out.insert("quality".to_string(), json!(0.9));
        Ok(out)
    });
    functions.register_fn("ship", |_| Ok(StagedOutputs::default()));
    functions.register_fn("rework", |_| Ok(StagedOutputs::default()));

    let (state, outcome, _events) = drive(graph, functions, None, None, &[]).await;
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(state.memory.read("verdict"), Some(&json!("ship")));
    assert_eq!(state.visits.get("ship"), Some(&1));
    assert!(state.visits.get("rework").is_none());
}

#[tokio::test]
async fn trace_is_totally_ordered_with_paired_outcomes() {
    let (_state, _outcome, events) = drive(
        linear_graph(),
        linear_functions(),
        None,
        None,
        &[("x", json!(1))],
    )
    .await;

    // Monotonic sequence numbers.
    let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
    let mut sorted = seqs.clone();
    sorted.sort_unstable();
    assert_eq!(seqs, sorted);

    // Run-ended arrives last and reports success.
    assert!(matches!(
        events.last().map(|e| &e.kind),
        Some(RunEventKind::RunEnded { success: true, .. })
    ));

    // Every outcome references a previously recorded decision.
    let mut decisions = std::collections::HashSet::new();
    for event in &events {
        match &event.kind {
            RunEventKind::Decision(d) => {
                decisions.insert(d.id.clone());
            }
            RunEventKind::Outcome(o) => {
                assert!(
                    decisions.contains(&o.decision_id),
                    "outcome references unknown decision {}",
                    o.decision_id
                );
            }
            _ => {}
        }
    }

    // One node execution outcome per executed node (A, B, C).
    let outcomes = events
        .iter()
        .filter(|e| matches!(e.kind, RunEventKind::Outcome(_)))
        .count();
    assert_eq!(outcomes, 3);
}
