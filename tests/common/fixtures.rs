//! Shared graph fixtures for the end-to-end scenarios.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use goalgraph::executors::{FunctionRegistry, FunctionError};
use goalgraph::graph::spec::{EdgeCondition, EdgeSpec, GraphSpec, NodeSpec};
use goalgraph::memory::StagedOutputs;

fn staged(pairs: &[(&str, Value)]) -> StagedOutputs {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Linear A -> B -> C, all on-success at priority 1. C is terminal.
pub fn linear_graph() -> GraphSpec {
    GraphSpec::new("linear", "1")
        .with_node(NodeSpec::function("a", "A").with_inputs(["x"]).with_outputs(["y"]))
        .with_node(NodeSpec::function("b", "B").with_inputs(["y"]).with_outputs(["z"]))
        .with_node(NodeSpec::function("c", "C").with_inputs(["z"]).with_outputs(["out"]))
        .with_edge(EdgeSpec::new("e-ab", "a", "b", EdgeCondition::OnSuccess, 1))
        .with_edge(EdgeSpec::new("e-bc", "b", "c", EdgeCondition::OnSuccess, 1))
        .with_entry_point("start", "a")
        .with_terminal_node("c")
}

pub fn linear_functions() -> FunctionRegistry {
    let mut functions = FunctionRegistry::new();
    functions.register_fn("a", |_| Ok(staged(&[("y", json!(2))])));
    functions.register_fn("b", |_| Ok(staged(&[("z", json!(3))])));
    functions.register_fn("c", |_| Ok(staged(&[("out", json!("ok"))])));
    functions
}

/// A -> B on-success, A -> E on-failure; A's binding fails. B and E terminal.
pub fn failure_graph() -> GraphSpec {
    GraphSpec::new("failure", "1")
        .with_node(NodeSpec::function("a", "A").with_outputs(["y"]).with_nullable_outputs(["y"]))
        .with_node(NodeSpec::function("b", "B"))
        .with_node(NodeSpec::function("e", "E"))
        .with_edge(EdgeSpec::new("e-ab", "a", "b", EdgeCondition::OnSuccess, 1))
        .with_edge(EdgeSpec::new("e-ae", "a", "e", EdgeCondition::OnFailure, 1))
        .with_entry_point("start", "a")
        .with_terminal_node("b")
        .with_terminal_node("e")
}

/// Counters exposing how many times each binding ran.
pub struct FailureCounters {
    pub b_runs: Arc<AtomicU32>,
    pub e_runs: Arc<AtomicU32>,
}

pub fn failure_functions() -> (FunctionRegistry, FailureCounters) {
    let b_runs = Arc::new(AtomicU32::new(0));
    let e_runs = Arc::new(AtomicU32::new(0));
    let mut functions = FunctionRegistry::new();
    functions.register_fn("a", |_| Err(FunctionError::new("deliberate failure")));
    {
        let b_runs = b_runs.clone();
        functions.register_fn("b", move |_| {
            b_runs.fetch_add(1, Ordering::SeqCst);
            Ok(StagedOutputs::default())
        });
    }
    {
        let e_runs = e_runs.clone();
        functions.register_fn("e", move |_| {
            e_runs.fetch_add(1, Ordering::SeqCst);
            Ok(StagedOutputs::default())
        });
    }
    (functions, FailureCounters { b_runs, e_runs })
}

/// intake -> research -> review -> report forward at priority 1, with a
/// feedback edge review -> research gated on `feedback != null` at -1.
/// Research is capped at three visits; report is terminal.
pub fn feedback_graph() -> GraphSpec {
    GraphSpec::new("feedback", "1")
        .with_node(NodeSpec::function("intake", "Intake").with_inputs(["topic"]).with_outputs(["brief"]))
        .with_node(
            NodeSpec::function("research", "Research")
                .with_inputs(["brief"])
                .with_outputs(["findings"])
                .with_max_visits(3),
        )
        .with_node(
            NodeSpec::function("review", "Review")
                .with_inputs(["findings"])
                .with_outputs(["feedback"])
                .with_max_visits(0),
        )
        .with_node(
            NodeSpec::function("report", "Report")
                .with_inputs(["findings"])
                .with_outputs(["report_out"]),
        )
        .with_edge(EdgeSpec::new("e-1", "intake", "research", EdgeCondition::OnSuccess, 1))
        .with_edge(EdgeSpec::new("e-2", "research", "review", EdgeCondition::OnSuccess, 1))
        .with_edge(EdgeSpec::new("e-3", "review", "report", EdgeCondition::OnSuccess, 1))
        .with_edge(EdgeSpec::conditional("e-loop", "review", "research", "feedback != null", -1))
        .with_entry_point("start", "intake")
        .with_terminal_node("report")
}

/// Review emits feedback twice, then approves (writes a null feedback).
pub fn feedback_functions() -> FunctionRegistry {
    let review_calls = Arc::new(AtomicU32::new(0));
    let mut functions = FunctionRegistry::new();
    functions.register_fn("intake", |_| Ok(staged(&[("brief", json!("the brief"))])));
    functions.register_fn("research", |_| Ok(staged(&[("findings", json!("findings"))])));
    {
        let review_calls = review_calls.clone();
        functions.register_fn("review", move |_| {
            let call = review_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call < 3 {
                Ok(staged(&[("feedback", json!(format!("revision {call}")))]))
            } else {
                Ok(staged(&[("feedback", Value::Null)]))
            }
        });
    }
    functions.register_fn("report", |_| Ok(staged(&[("report_out", json!("final"))])));
    functions
}

/// Self-loop bounded by a visit cap: A -> A while `not done` at -1,
/// A -> T when `done` at 1; A never sets `done` and is capped at 2 visits.
pub fn visit_cap_graph() -> GraphSpec {
    GraphSpec::new("visit-cap", "1")
        .with_node(
            NodeSpec::function("a", "A")
                .with_outputs(["done"])
                .with_nullable_outputs(["done"])
                .with_max_visits(2),
        )
        .with_node(NodeSpec::function("t", "T"))
        .with_edge(EdgeSpec::conditional("e-done", "a", "t", "done", 1))
        .with_edge(EdgeSpec::conditional("e-loop", "a", "a", "not done", -1))
        .with_entry_point("start", "a")
        .with_terminal_node("t")
}

pub fn visit_cap_functions() -> FunctionRegistry {
    let mut functions = FunctionRegistry::new();
    functions.register_fn("a", |_| Ok(StagedOutputs::default()));
    functions.register_fn("t", |_| Ok(StagedOutputs::default()));
    functions
}

/// Client-facing intake (pause node) followed by a function node that
/// consumes the resume input. `intake_resume` maps forward to `process`.
pub fn pause_graph() -> GraphSpec {
    GraphSpec::new("pause", "1")
        .with_node(
            NodeSpec::llm_tools("intake", "Intake", "Clarify the request about {topic}.")
                .with_inputs(["topic"])
                .client_facing(),
        )
        .with_node(
            NodeSpec::function("process", "Process")
                .with_inputs(["input"])
                .with_outputs(["result"]),
        )
        .with_edge(EdgeSpec::new("e-ip", "intake", "process", EdgeCondition::OnSuccess, 1))
        .with_entry_point("start", "intake")
        .with_entry_point("intake_resume", "process")
        .with_pause_node("intake")
        .with_terminal_node("process")
}

pub fn pause_functions() -> FunctionRegistry {
    let mut functions = FunctionRegistry::new();
    functions.register_fn("process", |view| {
        let answer = view
            .get("input")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(staged(&[("result", json!(format!("processed:{answer}")))]))
    });
    functions
}
