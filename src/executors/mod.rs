//! Node executors: the four narrow contracts a scheduler can dispatch to.
//!
//! Every executor consumes the node's scoped input view and produces an
//! [`ExecutorReport`]: an outcome (success with staged outputs, failure, or
//! suspension) plus the token usage it incurred. Executors never touch the
//! memory plane — the scheduler merges staged outputs atomically on success.

pub mod function;
pub mod generate;
pub mod router;
pub mod tools_loop;

pub use function::{FunctionError, FunctionNode, FunctionRegistry};

use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::broker::ToolBroker;
use crate::graph::spec::NodeSpec;
use crate::memory::{MemorySnapshot, StagedOutputs};
use crate::message::Message;
use crate::provider::{LlmProvider, TokenUsage};
use crate::types::{FailureKind, NodeType};
use crate::utils::template::{self, TemplateError};

/// Name of the pseudo-tool the model calls to stage a node output.
pub const SET_OUTPUT_TOOL: &str = "set_output";

#[derive(Debug, Error, Diagnostic)]
pub enum ExecutorError {
    /// Function node has no host-provided binding.
    #[error("function node {node} has no registered binding")]
    #[diagnostic(
        code(goalgraph::executor::missing_binding),
        help("Register an implementation for the node id before starting the run.")
    )]
    MissingBinding { node: String },

    /// Host-provided function raised or returned an ill-typed result.
    #[error("function node {node} failed: {message}")]
    #[diagnostic(code(goalgraph::executor::function))]
    Function { node: String, message: String },

    /// Prompt template referenced a key absent from the input view.
    #[error(transparent)]
    #[diagnostic(code(goalgraph::executor::template))]
    Template(#[from] TemplateError),

    /// The LLM provider surfaced an error.
    #[error("provider call failed at node {node}: {message}")]
    #[diagnostic(code(goalgraph::executor::provider))]
    Provider { node: String, message: String },

    /// The model response could not be mapped onto the node's contract.
    #[error("malformed model output at node {node}: {message}")]
    #[diagnostic(code(goalgraph::executor::malformed_output))]
    MalformedOutput { node: String, message: String },

    /// A required output was never staged before commit.
    #[error("node {node} committed without required output: {key}")]
    #[diagnostic(code(goalgraph::executor::missing_output))]
    MissingOutputs { node: String, key: String },

    /// The event loop hit its turn or token cap.
    #[error("node {node} exhausted its loop budget after {turns} turns / {tokens} tokens")]
    #[diagnostic(
        code(goalgraph::executor::loop_exhausted),
        help("Raise the loop caps or tighten the node's prompt.")
    )]
    LoopExhausted { node: String, turns: u32, tokens: u64 },

    /// A tool transport disconnected mid-call and could not be recovered.
    #[error("tool transport lost at node {node}: {message}")]
    #[diagnostic(code(goalgraph::executor::tool_transport))]
    ToolTransport { node: String, message: String },

    /// A configured deadline expired.
    #[error("{scope} deadline expired at node {node}")]
    #[diagnostic(code(goalgraph::executor::timeout))]
    Timeout { node: String, scope: String },

    /// A node needs a collaborator the runtime was not given.
    #[error("node {node} requires {what} but none is configured")]
    #[diagnostic(code(goalgraph::executor::not_configured))]
    NotConfigured { node: String, what: String },
}

impl ExecutorError {
    /// Maps onto the run-level failure vocabulary.
    ///
    /// Kinds without a dedicated entry fold into `DeadEnd`, which is what an
    /// uncovered node failure terminates the run with.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ExecutorError::MissingBinding { .. } | ExecutorError::NotConfigured { .. } => {
                FailureKind::Validation
            }
            ExecutorError::Template(_) => FailureKind::MissingInput,
            ExecutorError::Provider { .. } | ExecutorError::MalformedOutput { .. } => {
                FailureKind::LlmError
            }
            ExecutorError::MissingOutputs { .. } => FailureKind::MissingRequiredOutput,
            ExecutorError::LoopExhausted { .. } => FailureKind::LoopExhausted,
            ExecutorError::ToolTransport { .. } => FailureKind::ToolTransportLost,
            ExecutorError::Timeout { .. } => FailureKind::Timeout,
            ExecutorError::Function { .. } => FailureKind::DeadEnd,
        }
    }
}

/// Payload of a suspension: what to show the human, and the conversation to
/// continue from.
#[derive(Clone, Debug, PartialEq)]
pub struct PausePayload {
    /// Text the pause node emitted for the human.
    pub message: String,
    /// In-progress transcript, persisted for a same-node continuation.
    pub transcript: Vec<Message>,
}

/// What a node execution produced.
#[derive(Debug)]
pub enum NodeOutcome {
    Success(StagedOutputs),
    Failure(ExecutorError),
    Suspend(PausePayload),
}

/// Outcome plus the tokens the execution consumed.
#[derive(Debug)]
pub struct ExecutorReport {
    pub outcome: NodeOutcome,
    pub tokens: TokenUsage,
}

impl ExecutorReport {
    #[must_use]
    pub fn success(staged: StagedOutputs, tokens: TokenUsage) -> Self {
        Self {
            outcome: NodeOutcome::Success(staged),
            tokens,
        }
    }

    #[must_use]
    pub fn failure(error: ExecutorError, tokens: TokenUsage) -> Self {
        Self {
            outcome: NodeOutcome::Failure(error),
            tokens,
        }
    }
}

/// Per-call limits handed to the LLM executors.
#[derive(Clone, Copy, Debug)]
pub struct LoopLimits {
    pub llm_turn_timeout: Duration,
    pub max_turns: u32,
    pub max_loop_tokens: u64,
}

/// A conversation being continued after resume: the persisted transcript and
/// the human's reply.
#[derive(Clone, Debug)]
pub struct ResumedConversation {
    pub transcript: Vec<Message>,
    pub reply: String,
}

/// Everything an executor may need for one node execution.
pub struct ExecutorContext<'a> {
    pub node: &'a NodeSpec,
    /// Scoped input view (declared input keys only).
    pub view: MemorySnapshot,
    /// Rendered goal preamble, prepended to system prompts.
    pub goal_context: Option<&'a str>,
    pub provider: Option<Arc<dyn LlmProvider>>,
    pub broker: Option<Arc<ToolBroker>>,
    pub functions: &'a FunctionRegistry,
    pub limits: LoopLimits,
    /// Set when re-entering a client-facing node after resume.
    pub resumed: Option<ResumedConversation>,
}

/// Dispatches a node to its executor by type.
pub async fn execute(ctx: ExecutorContext<'_>) -> ExecutorReport {
    match ctx.node.node_type {
        NodeType::Function => function::execute(ctx).await,
        NodeType::LlmGenerate => generate::execute(ctx).await,
        NodeType::LlmTools => tools_loop::execute(ctx).await,
        NodeType::Router => router::execute(ctx),
    }
}

/// Renders the system prompt for an LLM node: goal preamble, then the node's
/// template resolved against the input view.
pub(crate) fn compose_system(
    node: &NodeSpec,
    view: &MemorySnapshot,
    goal_context: Option<&str>,
) -> Result<Option<String>, ExecutorError> {
    let rendered = node
        .system_prompt
        .as_deref()
        .map(|tpl| template::render(tpl, view))
        .transpose()?;
    Ok(match (goal_context, rendered) {
        (Some(goal), Some(prompt)) => Some(format!("{goal}\n{prompt}")),
        (Some(goal), None) => Some(goal.to_string()),
        (None, Some(prompt)) => Some(prompt),
        (None, None) => None,
    })
}

/// Serializes the input view as the first user message of a conversation.
///
/// Keys are emitted sorted so prompts are stable across runs.
pub(crate) fn context_section(view: &MemorySnapshot) -> String {
    if view.is_empty() {
        return "No input data.".to_string();
    }
    let mut keys: Vec<&String> = view.keys().collect();
    keys.sort();
    let mut out = String::from("--- Context Data ---\n");
    for key in keys {
        match &view[key] {
            Value::String(s) => out.push_str(&format!("{key}: {s}\n")),
            other => out.push_str(&format!("{key}: {other}\n")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::spec::NodeSpec;
    use serde_json::json;

    #[test]
    fn failure_kind_mapping() {
        let cases = [
            (
                ExecutorError::MissingBinding { node: "n".into() },
                FailureKind::Validation,
            ),
            (
                ExecutorError::Provider {
                    node: "n".into(),
                    message: "m".into(),
                },
                FailureKind::LlmError,
            ),
            (
                ExecutorError::LoopExhausted {
                    node: "n".into(),
                    turns: 1,
                    tokens: 2,
                },
                FailureKind::LoopExhausted,
            ),
            (
                ExecutorError::Timeout {
                    node: "n".into(),
                    scope: "llm-turn".into(),
                },
                FailureKind::Timeout,
            ),
            (
                ExecutorError::Function {
                    node: "n".into(),
                    message: "m".into(),
                },
                FailureKind::DeadEnd,
            ),
        ];
        for (error, kind) in cases {
            assert_eq!(error.failure_kind(), kind);
        }
    }

    #[test]
    fn compose_system_combines_goal_and_template() {
        let node = NodeSpec::llm_generate("n", "N", "Work on {task}.");
        let mut view = MemorySnapshot::default();
        view.insert("task".to_string(), json!("x"));
        let system = compose_system(&node, &view, Some("Goal: win")).unwrap();
        assert_eq!(system.unwrap(), "Goal: win\nWork on x.");
    }

    #[test]
    fn compose_system_fails_on_missing_placeholder() {
        let node = NodeSpec::llm_generate("n", "N", "Work on {task}.");
        let err = compose_system(&node, &MemorySnapshot::default(), None).unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::MissingInput);
    }

    #[test]
    fn context_section_is_sorted_and_stable() {
        let mut view = MemorySnapshot::default();
        view.insert("b".to_string(), json!(2));
        view.insert("a".to_string(), json!("text"));
        let section = context_section(&view);
        assert_eq!(section, "--- Context Data ---\na: text\nb: 2\n");
    }
}
