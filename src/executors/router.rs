//! Router executor: declarative predicate evaluation producing a routing key.
//!
//! A router evaluates its rules in order against the input view; the first
//! rule whose predicate holds emits its label into the node's single output
//! key. The scheduler then routes through conditional edges testing that key.
//! No LLM call, no tools.

use serde_json::Value;
use tracing::debug;

use super::{ExecutorContext, ExecutorError, ExecutorReport};
use crate::graph::predicate::Predicate;
use crate::memory::StagedOutputs;
use crate::provider::TokenUsage;

pub(super) fn execute(ctx: ExecutorContext<'_>) -> ExecutorReport {
    let node = ctx.node;
    let Some(output_key) = node.output_keys.first() else {
        return ExecutorReport::failure(
            ExecutorError::MissingOutputs {
                node: node.id.clone(),
                key: "<routing key>".to_string(),
            },
            TokenUsage::default(),
        );
    };

    for (idx, rule) in node.route_rules.iter().enumerate() {
        let predicate = match Predicate::parse(&rule.when) {
            Ok(p) => p,
            Err(e) => {
                return ExecutorReport::failure(
                    ExecutorError::MalformedOutput {
                        node: node.id.clone(),
                        message: format!("route rule {idx} does not parse: {e}"),
                    },
                    TokenUsage::default(),
                )
            }
        };
        if predicate.evaluate(&ctx.view) {
            debug!(node = %node.id, rule = idx, emit = %rule.emit, "route rule fired");
            let mut staged = StagedOutputs::default();
            staged.insert(output_key.clone(), Value::String(rule.emit.clone()));
            return ExecutorReport::success(staged, TokenUsage::default());
        }
    }

    if let Some(default) = &node.route_default {
        debug!(node = %node.id, emit = %default, "route default fired");
        let mut staged = StagedOutputs::default();
        staged.insert(output_key.clone(), Value::String(default.clone()));
        return ExecutorReport::success(staged, TokenUsage::default());
    }

    ExecutorReport::failure(
        ExecutorError::MissingOutputs {
            node: node.id.clone(),
            key: output_key.clone(),
        },
        TokenUsage::default(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::{FunctionRegistry, LoopLimits, NodeOutcome};
    use crate::graph::spec::NodeSpec;
    use crate::memory::MemorySnapshot;
    use serde_json::json;
    use std::time::Duration;

    fn run(node: &NodeSpec, view: MemorySnapshot) -> ExecutorReport {
        let functions = FunctionRegistry::new();
        execute(ExecutorContext {
            node,
            view,
            goal_context: None,
            provider: None,
            broker: None,
            functions: &functions,
            limits: LoopLimits {
                llm_turn_timeout: Duration::from_secs(1),
                max_turns: 1,
                max_loop_tokens: 1,
            },
            resumed: None,
        })
    }

    fn router() -> NodeSpec {
        NodeSpec::router("route", "Route")
            .with_inputs(["score"])
            .with_outputs(["verdict"])
            .with_route_rule("score >= 0.8", "accept")
            .with_route_rule("score >= 0.5", "revise")
            .with_route_default("reject")
    }

    #[test]
    fn first_matching_rule_wins() {
        let mut view = MemorySnapshot::default();
        view.insert("score".to_string(), json!(0.9));
        match run(&router(), view).outcome {
            NodeOutcome::Success(staged) => assert_eq!(staged["verdict"], "accept"),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn later_rule_fires_when_earlier_does_not() {
        let mut view = MemorySnapshot::default();
        view.insert("score".to_string(), json!(0.6));
        match run(&router(), view).outcome {
            NodeOutcome::Success(staged) => assert_eq!(staged["verdict"], "revise"),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn default_fires_when_no_rule_matches() {
        let mut view = MemorySnapshot::default();
        view.insert("score".to_string(), json!(0.1));
        match run(&router(), view).outcome {
            NodeOutcome::Success(staged) => assert_eq!(staged["verdict"], "reject"),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn no_match_without_default_fails() {
        let node = NodeSpec::router("r", "R")
            .with_inputs(["x"])
            .with_outputs(["k"])
            .with_route_rule("x > 10", "high");
        match run(&node, MemorySnapshot::default()).outcome {
            NodeOutcome::Failure(ExecutorError::MissingOutputs { key, .. }) => {
                assert_eq!(key, "k");
            }
            other => panic!("expected missing-output failure, got {other:?}"),
        }
    }
}
