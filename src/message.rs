//! Conversation transcript messages.
//!
//! Messages are the unit of the llm-tools event loop: the rendered system
//! prompt, the serialized input view, assistant turns, tool invocations and
//! their results all become entries in a per-node transcript. Transcripts are
//! persisted inside run snapshots so a suspended conversation can continue
//! after resume.
//!
//! # Examples
//!
//! ```
//! use goalgraph::message::Message;
//!
//! let user = Message::user("What is the weather in Paris?");
//! let reply = Message::assistant("Let me check.");
//! assert_eq!(user.role, Message::USER);
//! assert_eq!(reply.role, Message::ASSISTANT);
//!
//! // Tool traffic is recorded with its correlation id.
//! let result = Message::tool_result(42, "search", serde_json::json!({"hits": 3}), false);
//! assert_eq!(result.role, Message::TOOL);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry in an LLM conversation transcript.
///
/// Plain conversational turns carry only `role` and `content`. Tool traffic
/// additionally carries the tool name, the correlation id the broker used,
/// and (for results) the structured payload and error flag, so a persisted
/// transcript is enough to reconstruct exactly what the model saw.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    /// Sender role; use the constants on [`Message`].
    pub role: String,
    /// Text content of the turn (empty for pure tool-call turns).
    pub content: String,
    /// Tool name, set on tool-call and tool-result entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Broker correlation id, set on tool-call and tool-result entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<u64>,
    /// Structured tool payload: arguments on calls, result value on results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    /// Set on tool-result entries when the server returned a structured error.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Message {
    /// Human / resume input.
    pub const USER: &'static str = "user";
    /// Model output.
    pub const ASSISTANT: &'static str = "assistant";
    /// Rendered system prompt.
    pub const SYSTEM: &'static str = "system";
    /// Tool invocation or tool result.
    pub const TOOL: &'static str = "tool";

    /// Creates a plain message with the given role and content.
    #[must_use]
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new(Self::USER, content)
    }

    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    /// Records an outbound tool invocation in the transcript.
    #[must_use]
    pub fn tool_call(correlation_id: u64, tool_name: &str, arguments: Value) -> Self {
        Self {
            role: Self::ASSISTANT.to_string(),
            content: String::new(),
            tool_name: Some(tool_name.to_string()),
            correlation_id: Some(correlation_id),
            payload: Some(arguments),
            is_error: false,
        }
    }

    /// Records a tool reply in the transcript.
    ///
    /// The reply keeps both a human-readable rendering in `content` and the
    /// structured value in `payload`; structured object results stay
    /// inspectable without re-parsing.
    #[must_use]
    pub fn tool_result(correlation_id: u64, tool_name: &str, result: Value, is_error: bool) -> Self {
        let content = match &result {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Self {
            role: Self::TOOL.to_string(),
            content,
            tool_name: Some(tool_name.to_string()),
            correlation_id: Some(correlation_id),
            payload: Some(result),
            is_error,
        }
    }

    /// Returns `true` when this entry records tool traffic.
    #[must_use]
    pub fn is_tool_traffic(&self) -> bool {
        self.tool_name.is_some()
    }
}

impl From<&str> for Message {
    fn from(content: &str) -> Self {
        Message::user(content)
    }
}

impl From<(&str, &str)> for Message {
    fn from((role, content): (&str, &str)) -> Self {
        Message::new(role, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constructors_set_roles() {
        assert_eq!(Message::user("hi").role, "user");
        assert_eq!(Message::assistant("ok").role, "assistant");
        assert_eq!(Message::system("sys").role, "system");
    }

    #[test]
    fn tool_result_renders_strings_bare() {
        let m = Message::tool_result(7, "search", json!("three hits"), false);
        assert_eq!(m.content, "three hits");
        assert_eq!(m.correlation_id, Some(7));
        assert!(m.is_tool_traffic());
    }

    #[test]
    fn tool_result_renders_objects_as_json() {
        let m = Message::tool_result(8, "search", json!({"hits": 3}), false);
        assert_eq!(m.content, r#"{"hits":3}"#);
        assert_eq!(m.payload, Some(json!({"hits": 3})));
    }

    #[test]
    fn serde_round_trip_skips_empty_tool_fields() {
        let m = Message::user("plain");
        let s = serde_json::to_string(&m).unwrap();
        assert!(!s.contains("tool_name"));
        assert!(!s.contains("is_error"));
        let back: Message = serde_json::from_str(&s).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn from_conversions() {
        let m: Message = "hello".into();
        assert_eq!(m.role, Message::USER);
        let m: Message = (Message::TOOL, "output").into();
        assert_eq!(m.role, "tool");
    }
}
