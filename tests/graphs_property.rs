#[macro_use]
extern crate proptest;

use proptest::prelude::{prop, Strategy};

mod common;

use std::sync::atomic::Ordering;

use goalgraph::executors::FunctionRegistry;
use goalgraph::graph::predicate::Predicate;
use goalgraph::graph::spec::{EdgeCondition, EdgeSpec, GraphSpec, NodeSpec};
use goalgraph::graph::{from_json, to_json};
use goalgraph::memory::StagedOutputs;
use goalgraph::scheduler::RunOutcome;

/// Valid node / key identifiers: letter first, then word characters.
fn ident_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,12}").unwrap()
}

fn block_on<F: std::future::Future<Output = ()>>(fut: F) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(fut);
}

proptest! {
    /// Property: every valid linear graph survives a document round-trip
    /// unchanged: `from_json(to_json(g)) == g`.
    #[test]
    fn prop_document_round_trip(
        mut names in prop::collection::vec(ident_strategy(), 2..8),
        version in "[0-9]{1,3}",
    ) {
        names.sort();
        names.dedup();
        prop_assume!(names.len() >= 2);

        let mut graph = GraphSpec::new("prop-linear", &version);
        for (i, name) in names.iter().enumerate() {
            let mut node = NodeSpec::function(name, name).with_outputs([format!("out_{name}")]);
            if i > 0 {
                node = node.with_inputs([format!("out_{}", names[i - 1])]);
            }
            graph = graph.with_node(node);
        }
        for pair in names.windows(2) {
            graph = graph.with_edge(EdgeSpec::new(
                &format!("e-{}-{}", pair[0], pair[1]),
                &pair[0],
                &pair[1],
                EdgeCondition::OnSuccess,
                1,
            ));
        }
        graph = graph
            .with_entry_point("start", &names[0])
            .with_terminal_node(names.last().unwrap());

        let text = to_json(&graph).expect("serialize");
        let back = from_json(&text).expect("round trip parses and validates");
        prop_assert_eq!(graph, back);
    }
}

proptest! {
    /// Property: a parsed predicate evaluates deterministically and only
    /// reads the names it reports.
    #[test]
    fn prop_predicate_reads_only_reported_names(
        key in ident_strategy(),
        other in ident_strategy(),
        threshold in 0i64..100,
        value in 0i64..100,
    ) {
        prop_assume!(key != other);

        let expr = format!("{key} >= {threshold}");
        let predicate = Predicate::parse(&expr).unwrap();
        prop_assert_eq!(predicate.referenced_names(), vec![key.clone()]);

        let mut memory = rustc_hash::FxHashMap::default();
        memory.insert(key, serde_json::json!(value));
        let with_key = predicate.evaluate(&memory);
        prop_assert_eq!(with_key, value >= threshold);

        // An unrelated key never changes the verdict.
        memory.insert(other, serde_json::json!(value + 1));
        prop_assert_eq!(predicate.evaluate(&memory), with_key);
    }
}

proptest! {
    /// Property: however small the cap, a self-looping node never executes
    /// more than `max_visits` times.
    #[test]
    fn prop_visit_counter_never_exceeds_cap(cap in 1u32..6) {
        block_on(async move {
            let graph = GraphSpec::new("prop-cap", "1")
                .with_node(
                    NodeSpec::function("spin", "Spin")
                        .with_outputs(["done"])
                        .with_nullable_outputs(["done"])
                        .with_max_visits(cap),
                )
                .with_node(NodeSpec::function("exit", "Exit"))
                .with_edge(EdgeSpec::conditional("e-exit", "spin", "exit", "done", 1))
                .with_edge(EdgeSpec::conditional("e-spin", "spin", "spin", "not done", -1))
                .with_entry_point("start", "spin")
                .with_terminal_node("exit");

            let executions = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
            let mut functions = FunctionRegistry::new();
            {
                let executions = executions.clone();
                functions.register_fn("spin", move |_| {
                    executions.fetch_add(1, Ordering::SeqCst);
                    Ok(StagedOutputs::default())
                });
            }
            functions.register_fn("exit", |_| Ok(StagedOutputs::default()));

            let (state, outcome, _events) =
                common::drive(graph, functions, None, None, &[]).await;

            assert_eq!(executions.load(Ordering::SeqCst), cap);
            assert_eq!(state.visits.get("spin"), Some(&cap));
            assert!(matches!(outcome, RunOutcome::Failed { .. }));
        });
    }
}
