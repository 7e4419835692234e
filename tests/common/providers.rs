//! Scripted LLM provider for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use goalgraph::executors::SET_OUTPUT_TOOL;
use goalgraph::provider::{
    ChatRequest, ChatResponse, LlmProvider, ProviderError, TokenUsage, ToolUse,
};

/// Replays a fixed sequence of responses; an exhausted script is a provider
/// error so runaway loops fail loudly.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ChatResponse>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            script: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests observed so far, for asserting on prompts and transcripts.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, request: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::Api {
                message: "scripted provider exhausted".to_string(),
            })
    }
}

/// A plain-text turn.
pub fn text(content: &str) -> ChatResponse {
    ChatResponse {
        content: content.to_string(),
        tool_uses: vec![],
        usage: TokenUsage::new(10, 5),
    }
}

/// A turn invoking one real tool.
pub fn tool_call(name: &str, arguments: Value) -> ChatResponse {
    ChatResponse {
        content: String::new(),
        tool_uses: vec![ToolUse {
            id: format!("use-{name}"),
            name: name.to_string(),
            arguments,
        }],
        usage: TokenUsage::new(10, 5),
    }
}

/// A turn staging one node output through the pseudo-tool.
pub fn set_output(name: &str, value: Value) -> ChatResponse {
    ChatResponse {
        content: String::new(),
        tool_uses: vec![ToolUse {
            id: format!("set-{name}"),
            name: SET_OUTPUT_TOOL.to_string(),
            arguments: json!({"name": name, "value": value}),
        }],
        usage: TokenUsage::new(10, 5),
    }
}

/// A malformed turn mixing `set_output` with a real tool call.
pub fn mixed_set_output_and_tool(output: &str, tool: &str) -> ChatResponse {
    ChatResponse {
        content: String::new(),
        tool_uses: vec![
            ToolUse {
                id: "set".to_string(),
                name: SET_OUTPUT_TOOL.to_string(),
                arguments: json!({"name": output, "value": 1}),
            },
            ToolUse {
                id: "call".to_string(),
                name: tool.to_string(),
                arguments: json!({}),
            },
        ],
        usage: TokenUsage::new(10, 5),
    }
}
