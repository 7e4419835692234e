#![allow(dead_code)]

pub mod fixtures;
pub mod providers;
pub mod tools;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use serde_json::Value;

use goalgraph::broker::ToolBroker;
use goalgraph::executors::{FunctionRegistry, LoopLimits};
use goalgraph::graph::spec::GraphSpec;
use goalgraph::memory::MemoryPlane;
use goalgraph::provider::LlmProvider;
use goalgraph::recorder::{MemorySink, TraceBus};
use goalgraph::scheduler::{RunOutcome, RunState, Scheduler};
use goalgraph::types::RunId;

/// Builds an input payload from literal pairs.
pub fn payload(pairs: &[(&str, Value)]) -> FxHashMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn test_limits() -> LoopLimits {
    LoopLimits {
        llm_turn_timeout: Duration::from_secs(5),
        max_turns: 8,
        max_loop_tokens: 100_000,
    }
}

/// Drives a graph once from `start` with a scheduler wired to a memory trace
/// sink. Returns the final run state, the outcome, and the captured trace.
pub async fn drive(
    graph: GraphSpec,
    functions: FunctionRegistry,
    provider: Option<Arc<dyn LlmProvider>>,
    broker: Option<Arc<ToolBroker>>,
    input: &[(&str, Value)],
) -> (RunState, RunOutcome, Vec<goalgraph::recorder::TraceEvent>) {
    let sink = MemorySink::new();
    let bus = TraceBus::with_sinks(vec![Box::new(sink.clone())]);
    bus.listen();

    let run_id = RunId::from("test-run");
    let recorder = bus.recorder_for(run_id.clone());
    let graph = Arc::new(graph);

    let scheduler = Scheduler::new(
        graph,
        provider,
        broker,
        Arc::new(functions),
        recorder,
        test_limits(),
        Duration::from_secs(30),
        Arc::new(AtomicBool::new(false)),
    );

    let mut state = RunState::new(run_id, MemoryPlane::from_payload(&payload(input)));
    let outcome = scheduler
        .drive(&mut state, "start", None)
        .await
        .expect("scheduler drive");

    // Let the listener drain before stopping the bus.
    tokio::time::sleep(Duration::from_millis(50)).await;
    bus.stop().await;

    (state, outcome, sink.snapshot())
}
