//! Semantic interface to the LLM provider.
//!
//! The runtime consumes a narrow chat-completion surface: a system prompt, a
//! transcript, an optional tool schema list, and a response that carries text
//! and/or tool invocations plus token usage. Concrete provider clients live
//! outside this crate; tests script a mock against this trait.

use async_trait::async_trait;
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::message::Message;

/// Token accounting for one provider call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    #[must_use]
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn absorb(&mut self, other: TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// Description of a callable tool, as presented to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the tool's parameters.
    pub parameters: Value,
}

/// One tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    /// Provider-assigned id of the invocation within the response.
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// A chat-completion request.
#[derive(Clone, Debug, Default)]
pub struct ChatRequest {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
}

/// A chat-completion response: text, tool invocations, usage.
#[derive(Clone, Debug, Default)]
pub struct ChatResponse {
    pub content: String,
    pub tool_uses: Vec<ToolUse>,
    pub usage: TokenUsage,
}

impl ChatResponse {
    /// Plain text response with no tool calls — the loop's commit signal.
    #[must_use]
    pub fn is_plain_text(&self) -> bool {
        self.tool_uses.is_empty()
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum ProviderError {
    #[error("provider rate limited: {message}")]
    #[diagnostic(
        code(goalgraph::provider::rate_limited),
        help("Back off and retry, or lower request volume.")
    )]
    RateLimited { message: String },

    #[error("provider error: {message}")]
    #[diagnostic(code(goalgraph::provider::api))]
    Api { message: String },
}

/// The single operation the runtime needs from a provider.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError>;
}
