//! LLM-tools executor: the multi-turn event loop at the heart of the runtime.
//!
//! The loop alternates between provider calls and broker-mediated tool calls:
//!
//! 1. Render the system prompt; seed the transcript with the serialized input
//!    view (or continue a persisted transcript after resume).
//! 2. Call the provider with the transcript and the node's permitted tool
//!    schemas plus the `set_output` pseudo-tool.
//! 3. Tool invocations recurse through the broker; each result is appended to
//!    the transcript as it arrives and the loop continues.
//! 4. A `set_output` call stages a value under a declared output key. It must
//!    arrive in a turn with no other tool calls.
//! 5. Plain text with no tool calls commits the staged outputs — or, for a
//!    client-facing node, suspends the run carrying the text to present to
//!    the human. Suspension therefore occurs strictly between LLM turns.
//!
//! Tool errors are appended to the transcript as structured results for the
//! model to observe; they never fail the node. Transport loss and deadlines
//! do. Reaching the per-node turn or token cap fails with loop exhaustion.

use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use super::{
    compose_system, context_section, ExecutorContext, ExecutorError, ExecutorReport, NodeOutcome,
    PausePayload, SET_OUTPUT_TOOL,
};
use crate::broker::BrokerError;
use crate::memory::StagedOutputs;
use crate::message::Message;
use crate::provider::{ChatRequest, ChatResponse, TokenUsage, ToolSchema, ToolUse};

/// Schema of the pseudo-tool the model uses to stage node outputs.
fn set_output_schema() -> ToolSchema {
    ToolSchema {
        name: SET_OUTPUT_TOOL.to_string(),
        description: "Stage a value under one of this node's declared output keys. \
                      Call once per output, in a turn with no other tool calls."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "description": "Declared output key"},
                "value": {"description": "Value to stage"}
            },
            "required": ["name", "value"]
        }),
    }
}

#[instrument(skip(ctx), fields(node = %ctx.node.id))]
pub(super) async fn execute(ctx: ExecutorContext<'_>) -> ExecutorReport {
    let node = ctx.node;
    let mut tokens = TokenUsage::default();

    let Some(provider) = ctx.provider.clone() else {
        return ExecutorReport::failure(
            ExecutorError::NotConfigured {
                node: node.id.clone(),
                what: "an LLM provider".to_string(),
            },
            tokens,
        );
    };

    let system = match compose_system(node, &ctx.view, ctx.goal_context) {
        Ok(system) => system,
        Err(e) => return ExecutorReport::failure(e, tokens),
    };

    // Fresh conversation, or continuation of a suspended one.
    let mut transcript = match &ctx.resumed {
        Some(resumed) => {
            let mut transcript = resumed.transcript.clone();
            transcript.push(Message::user(&resumed.reply));
            transcript
        }
        None => vec![Message::user(&context_section(&ctx.view))],
    };

    let mut tool_schemas = match &ctx.broker {
        Some(broker) => broker.tool_schemas(&node.tools).await,
        None => Vec::new(),
    };
    tool_schemas.push(set_output_schema());

    let mut staged = StagedOutputs::default();

    for turn in 0..ctx.limits.max_turns {
        if tokens.total() >= ctx.limits.max_loop_tokens {
            return ExecutorReport::failure(
                ExecutorError::LoopExhausted {
                    node: node.id.clone(),
                    turns: turn,
                    tokens: tokens.total(),
                },
                tokens,
            );
        }

        let request = ChatRequest {
            system: system.clone(),
            messages: transcript.clone(),
            tools: tool_schemas.clone(),
        };
        let response: ChatResponse =
            match tokio::time::timeout(ctx.limits.llm_turn_timeout, provider.complete(request))
                .await
            {
                Err(_) => {
                    return ExecutorReport::failure(
                        ExecutorError::Timeout {
                            node: node.id.clone(),
                            scope: "llm-turn".to_string(),
                        },
                        tokens,
                    )
                }
                Ok(Err(e)) => {
                    return ExecutorReport::failure(
                        ExecutorError::Provider {
                            node: node.id.clone(),
                            message: e.to_string(),
                        },
                        tokens,
                    )
                }
                Ok(Ok(response)) => response,
            };
        tokens.absorb(response.usage);

        if !response.content.is_empty() {
            transcript.push(Message::assistant(&response.content));
        }

        let set_outputs: Vec<&ToolUse> = response
            .tool_uses
            .iter()
            .filter(|t| t.name == SET_OUTPUT_TOOL)
            .collect();

        if !set_outputs.is_empty() {
            // set_output must arrive alone; mixing it with real tool calls is
            // malformed output.
            if set_outputs.len() != response.tool_uses.len() {
                return ExecutorReport::failure(
                    ExecutorError::MalformedOutput {
                        node: node.id.clone(),
                        message: "set_output mixed with tool calls in one turn".to_string(),
                    },
                    tokens,
                );
            }
            for tool_use in set_outputs {
                match stage_output(node, &tool_use.arguments, &mut staged) {
                    Ok(key) => {
                        debug!(node = %node.id, key = %key, "output staged");
                        transcript.push(pseudo_tool_ack(&format!("staged output: {key}")));
                    }
                    Err(e) => return ExecutorReport::failure(e, tokens),
                }
            }
            continue;
        }

        if !response.tool_uses.is_empty() {
            for tool_use in &response.tool_uses {
                match call_tool(&ctx, node, tool_use, &mut transcript).await {
                    Ok(()) => {}
                    Err(e) => return ExecutorReport::failure(e, tokens),
                }
            }
            continue;
        }

        // Plain text, no tool calls.
        if node.client_facing {
            debug!(node = %node.id, turn, "client-facing node suspending for human input");
            return ExecutorReport {
                outcome: NodeOutcome::Suspend(PausePayload {
                    message: response.content,
                    transcript,
                }),
                tokens,
            };
        }

        for key in node.required_outputs() {
            if !staged.contains_key(key) {
                return ExecutorReport::failure(
                    ExecutorError::MissingOutputs {
                        node: node.id.clone(),
                        key: key.clone(),
                    },
                    tokens,
                );
            }
        }
        return ExecutorReport::success(staged, tokens);
    }

    ExecutorReport::failure(
        ExecutorError::LoopExhausted {
            node: node.id.clone(),
            turns: ctx.limits.max_turns,
            tokens: tokens.total(),
        },
        tokens,
    )
}

/// Validates and stages one `set_output` call.
fn stage_output(
    node: &crate::graph::spec::NodeSpec,
    arguments: &Value,
    staged: &mut StagedOutputs,
) -> Result<String, ExecutorError> {
    let name = arguments
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ExecutorError::MalformedOutput {
            node: node.id.clone(),
            message: "set_output call carries no name".to_string(),
        })?;
    if !node.output_keys.iter().any(|k| k == name) {
        return Err(ExecutorError::MalformedOutput {
            node: node.id.clone(),
            message: format!("set_output names undeclared key: {name}"),
        });
    }
    let value = arguments.get("value").cloned().unwrap_or(Value::Null);
    staged.insert(name.to_string(), value);
    Ok(name.to_string())
}

/// Dispatches one tool call through the broker and appends the result.
///
/// Tool errors (including unknown or unpermitted tools) come back as
/// structured results for the model; only transport loss and deadlines fail
/// the node.
async fn call_tool(
    ctx: &ExecutorContext<'_>,
    node: &crate::graph::spec::NodeSpec,
    tool_use: &ToolUse,
    transcript: &mut Vec<Message>,
) -> Result<(), ExecutorError> {
    if !node.tools.iter().any(|t| t == &tool_use.name) {
        warn!(node = %node.id, tool = %tool_use.name, "model called unpermitted tool");
        transcript.push(Message::tool_result(
            0,
            &tool_use.name,
            json!({"error": format!("tool {} is not permitted for this node", tool_use.name)}),
            true,
        ));
        return Ok(());
    }

    let Some(broker) = ctx.broker.clone() else {
        return Err(ExecutorError::NotConfigured {
            node: node.id.clone(),
            what: "a tool broker".to_string(),
        });
    };

    let correlation_id = broker.next_correlation_id();
    transcript.push(Message::tool_call(
        correlation_id,
        &tool_use.name,
        tool_use.arguments.clone(),
    ));

    match broker
        .invoke(&tool_use.name, tool_use.arguments.clone(), correlation_id)
        .await
    {
        Ok(outcome) => {
            transcript.push(Message::tool_result(
                outcome.correlation_id,
                &tool_use.name,
                outcome.content,
                outcome.is_error,
            ));
            Ok(())
        }
        Err(BrokerError::Deadline { tool, .. }) => Err(ExecutorError::Timeout {
            node: node.id.clone(),
            scope: format!("tool-call {tool}"),
        }),
        Err(BrokerError::TransportLost { message, .. }) => Err(ExecutorError::ToolTransport {
            node: node.id.clone(),
            message,
        }),
        Err(other) => {
            // Lookup failures are tool errors the model can react to.
            transcript.push(Message::tool_result(
                correlation_id,
                &tool_use.name,
                json!({"error": other.to_string()}),
                true,
            ));
            Ok(())
        }
    }
}

fn pseudo_tool_ack(text: &str) -> Message {
    Message {
        role: Message::TOOL.to_string(),
        content: text.to_string(),
        tool_name: Some(SET_OUTPUT_TOOL.to_string()),
        correlation_id: None,
        payload: None,
        is_error: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::spec::NodeSpec;

    #[test]
    fn stage_output_accepts_declared_key() {
        let node = NodeSpec::llm_tools("n", "N", "p").with_outputs(["report"]);
        let mut staged = StagedOutputs::default();
        let key = stage_output(&node, &json!({"name": "report", "value": "text"}), &mut staged)
            .unwrap();
        assert_eq!(key, "report");
        assert_eq!(staged["report"], "text");
    }

    #[test]
    fn stage_output_rejects_undeclared_key() {
        let node = NodeSpec::llm_tools("n", "N", "p").with_outputs(["report"]);
        let mut staged = StagedOutputs::default();
        let err = stage_output(&node, &json!({"name": "other", "value": 1}), &mut staged)
            .unwrap_err();
        assert!(matches!(err, ExecutorError::MalformedOutput { .. }));
    }

    #[test]
    fn stage_output_requires_name() {
        let node = NodeSpec::llm_tools("n", "N", "p").with_outputs(["report"]);
        let mut staged = StagedOutputs::default();
        assert!(stage_output(&node, &json!({"value": 1}), &mut staged).is_err());
    }

    #[test]
    fn set_output_schema_lists_required_fields() {
        let schema = set_output_schema();
        assert_eq!(schema.name, SET_OUTPUT_TOOL);
        assert_eq!(schema.parameters["required"], json!(["name", "value"]));
    }
}
