//! In-process tool transport for broker tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use goalgraph::broker::{methods, ToolTransport, TransportError};

/// One recorded request frame.
#[derive(Clone, Debug)]
pub struct Frame {
    pub method: String,
    pub params: Value,
    pub id: u64,
}

/// Behavior of the mock for `tools/call` requests.
#[derive(Clone)]
pub enum CallBehavior {
    /// Reply with this result value.
    Reply(Value),
    /// Reply with a JSON-RPC error object.
    Error(String),
    /// Simulate a dropped connection.
    Lose,
    /// Sleep past any reasonable deadline before replying.
    Stall(Duration),
}

/// Scriptable in-process tool server.
pub struct MockTransport {
    tools: Vec<(String, String)>,
    behavior: Mutex<CallBehavior>,
    pub frames: Arc<Mutex<Vec<Frame>>>,
}

impl MockTransport {
    pub fn new(tools: &[(&str, &str)]) -> Self {
        Self {
            tools: tools
                .iter()
                .map(|(n, d)| (n.to_string(), d.to_string()))
                .collect(),
            behavior: Mutex::new(CallBehavior::Reply(json!({"ok": true}))),
            frames: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_behavior(self, behavior: CallBehavior) -> Self {
        *self.behavior.lock().unwrap() = behavior;
        self
    }

    pub fn set_behavior(&self, behavior: CallBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Recorded `tools/call` frames only.
    pub fn invocations(&self) -> Vec<Frame> {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.method == methods::INVOKE)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ToolTransport for MockTransport {
    async fn request(&self, method: &str, params: Value, id: u64) -> Result<Value, TransportError> {
        self.frames.lock().unwrap().push(Frame {
            method: method.to_string(),
            params: params.clone(),
            id,
        });

        match method {
            methods::HANDSHAKE => Ok(json!({"protocol": "test", "capabilities": {}})),
            methods::LIST_TOOLS => Ok(json!({
                "tools": self.tools.iter().map(|(name, description)| json!({
                    "name": name,
                    "description": description,
                    "inputSchema": {"type": "object"},
                })).collect::<Vec<_>>()
            })),
            methods::INVOKE => {
                let behavior = self.behavior.lock().unwrap().clone();
                match behavior {
                    CallBehavior::Reply(value) => Ok(value),
                    CallBehavior::Error(message) => Err(TransportError::Rpc { message }),
                    CallBehavior::Lose => Err(TransportError::Lost {
                        message: "mock connection dropped".to_string(),
                    }),
                    CallBehavior::Stall(duration) => {
                        tokio::time::sleep(duration).await;
                        Ok(json!({"late": true}))
                    }
                }
            }
            methods::SHUTDOWN => Ok(json!({})),
            other => Err(TransportError::Protocol {
                message: format!("unexpected method {other}"),
            }),
        }
    }

    async fn close(&self) {}
}
