//! LLM-generate executor: one provider call, outputs parsed from the
//! response.
//!
//! The system prompt template is rendered against the input view (missing
//! placeholders fail before the provider is reached), the input view is
//! serialized as the single user message, and the response is mapped onto the
//! node's declared output keys: a JSON object in the response fills matching
//! keys; otherwise a single-output node receives the raw text.

use serde_json::Value;
use tracing::debug;

use super::{compose_system, context_section, ExecutorContext, ExecutorError, ExecutorReport};
use crate::memory::StagedOutputs;
use crate::message::Message;
use crate::provider::{ChatRequest, TokenUsage};
use crate::utils::json_extract::extract_json;

pub(super) async fn execute(ctx: ExecutorContext<'_>) -> ExecutorReport {
    let node = ctx.node;
    let Some(provider) = ctx.provider.clone() else {
        return ExecutorReport::failure(
            ExecutorError::NotConfigured {
                node: node.id.clone(),
                what: "an LLM provider".to_string(),
            },
            TokenUsage::default(),
        );
    };

    let system = match compose_system(node, &ctx.view, ctx.goal_context) {
        Ok(system) => system,
        Err(e) => return ExecutorReport::failure(e, TokenUsage::default()),
    };

    let request = ChatRequest {
        system,
        messages: vec![Message::user(&context_section(&ctx.view))],
        tools: Vec::new(),
    };

    debug!(node = %node.id, "calling provider");
    let response = match tokio::time::timeout(ctx.limits.llm_turn_timeout, provider.complete(request))
        .await
    {
        Err(_) => {
            return ExecutorReport::failure(
                ExecutorError::Timeout {
                    node: node.id.clone(),
                    scope: "llm-turn".to_string(),
                },
                TokenUsage::default(),
            )
        }
        Ok(Err(e)) => {
            return ExecutorReport::failure(
                ExecutorError::Provider {
                    node: node.id.clone(),
                    message: e.to_string(),
                },
                TokenUsage::default(),
            )
        }
        Ok(Ok(response)) => response,
    };

    let tokens = response.usage;
    match parse_outputs(node, &response.content) {
        Ok(staged) => ExecutorReport::success(staged, tokens),
        Err(e) => ExecutorReport::failure(e, tokens),
    }
}

/// Maps response text onto the node's declared output shape.
fn parse_outputs(
    node: &crate::graph::spec::NodeSpec,
    content: &str,
) -> Result<StagedOutputs, ExecutorError> {
    let mut staged = StagedOutputs::default();

    if let Some(parsed) = extract_json(content) {
        if let Value::Object(object) = &parsed {
            let mut matched = false;
            for key in &node.output_keys {
                if let Some(value) = object.get(key) {
                    staged.insert(key.clone(), value.clone());
                    matched = true;
                }
            }
            if matched {
                return Ok(staged);
            }
        }
        // Parsed but nothing matched: a single-output node takes the value whole.
        if node.output_keys.len() == 1 {
            staged.insert(node.output_keys[0].clone(), parsed);
            return Ok(staged);
        }
    }

    if node.output_keys.len() == 1 {
        staged.insert(
            node.output_keys[0].clone(),
            Value::String(content.trim().to_string()),
        );
        return Ok(staged);
    }

    Err(ExecutorError::MalformedOutput {
        node: node.id.clone(),
        message: format!(
            "response carries no JSON object covering the {} declared outputs",
            node.output_keys.len()
        ),
    })
}
