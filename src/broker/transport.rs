//! Transports for reaching tool servers.
//!
//! Two transports are supported: a child process speaking line-delimited
//! JSON-RPC 2.0 over its standard streams, and an HTTP endpoint accepting the
//! same envelopes via POST. The broker addresses both through the
//! [`ToolTransport`] trait; tests plug in-process fakes through the same
//! seam.
//!
//! Correlation: every request carries a numeric id and the reply must echo
//! it. The stdio transport routes replies to waiters through a pending map;
//! replies whose id matches no waiter (e.g. a call abandoned by
//! cancellation) are discarded.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::config::{ToolServerConfig, TransportConfig};

#[derive(Debug, Error, Diagnostic)]
pub enum TransportError {
    #[error("failed to spawn tool server process: {message}")]
    #[diagnostic(
        code(goalgraph::transport::spawn),
        help("Check the configured command, arguments, and working directory.")
    )]
    Spawn { message: String },

    #[error("transport connection lost: {message}")]
    #[diagnostic(code(goalgraph::transport::lost))]
    Lost { message: String },

    #[error("transport I/O error: {source}")]
    #[diagnostic(code(goalgraph::transport::io))]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("HTTP transport error: {source}")]
    #[diagnostic(code(goalgraph::transport::http))]
    Http {
        #[from]
        source: reqwest::Error,
    },

    #[error("tool server returned a protocol error: {message}")]
    #[diagnostic(code(goalgraph::transport::rpc))]
    Rpc { message: String },

    #[error("malformed frame from tool server: {message}")]
    #[diagnostic(code(goalgraph::transport::protocol))]
    Protocol { message: String },
}

/// A connection to one tool server.
///
/// `request` sends one JSON-RPC request with the given correlation id and
/// blocks until the matching reply arrives; the caller layers its own
/// deadline on top.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value, id: u64) -> Result<Value, TransportError>;

    /// Releases the connection. Best-effort; errors are logged, not surfaced.
    async fn close(&self);
}

/// Opens the transport described by a server configuration.
pub async fn connect(config: &ToolServerConfig) -> Result<Box<dyn ToolTransport>, TransportError> {
    match &config.transport {
        TransportConfig::Stdio {
            command,
            args,
            env,
            cwd,
        } => {
            let transport = StdioTransport::spawn(command, args, env, cwd.as_deref()).await?;
            Ok(Box::new(transport))
        }
        TransportConfig::Http { url, headers } => {
            let transport = HttpTransport::new(url, headers)?;
            Ok(Box::new(transport))
        }
    }
}

fn envelope(method: &str, params: Value, id: u64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

/// Extracts the `result` member, surfacing `error` members as [`TransportError::Rpc`].
fn unwrap_reply(reply: Value) -> Result<Value, TransportError> {
    if let Some(error) = reply.get("error") {
        return Err(TransportError::Rpc {
            message: error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unspecified error")
                .to_string(),
        });
    }
    match reply.get("result") {
        Some(result) => Ok(result.clone()),
        None => Err(TransportError::Protocol {
            message: "reply carries neither result nor error".to_string(),
        }),
    }
}

type PendingMap = Arc<Mutex<FxHashMap<u64, oneshot::Sender<Value>>>>;

/// Child process with line-framed byte streams.
///
/// Writes are serialized behind a mutex; a background task reads reply lines
/// and routes them to waiters by id.
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    pending: PendingMap,
    child: Mutex<Child>,
    reader: JoinHandle<()>,
}

impl StdioTransport {
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &FxHashMap<String, String>,
        cwd: Option<&str>,
    ) -> Result<Self, TransportError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in env {
            cmd.env(k, v);
        }
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| TransportError::Spawn {
            message: format!("{command}: {e}"),
        })?;
        let stdin = child.stdin.take().ok_or_else(|| TransportError::Spawn {
            message: "child stdin unavailable".to_string(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| TransportError::Spawn {
            message: "child stdout unavailable".to_string(),
        })?;

        let pending: PendingMap = Arc::new(Mutex::new(FxHashMap::default()));
        let reader_pending = pending.clone();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        let Ok(frame) = serde_json::from_str::<Value>(line) else {
                            warn!(frame = %line, "dropping unparseable frame from tool server");
                            continue;
                        };
                        let Some(id) = frame.get("id").and_then(Value::as_u64) else {
                            // Notification; nothing is waiting on it.
                            continue;
                        };
                        let waiter = reader_pending.lock().await.remove(&id);
                        match waiter {
                            Some(tx) => {
                                let _ = tx.send(frame);
                            }
                            None => {
                                // Reply for an abandoned call; discard.
                                debug!(id, "discarding reply with no matching correlation id");
                            }
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
            // Stream closed: fail everything still waiting.
            reader_pending.lock().await.clear();
        });

        Ok(Self {
            stdin: Mutex::new(stdin),
            pending,
            child: Mutex::new(child),
            reader,
        })
    }
}

#[async_trait]
impl ToolTransport for StdioTransport {
    async fn request(&self, method: &str, params: Value, id: u64) -> Result<Value, TransportError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let frame = envelope(method, params, id);
        let mut line = serde_json::to_string(&frame).map_err(|e| TransportError::Protocol {
            message: e.to_string(),
        })?;
        line.push('\n');

        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                self.pending.lock().await.remove(&id);
                return Err(TransportError::Lost {
                    message: format!("write failed: {e}"),
                });
            }
            if let Err(e) = stdin.flush().await {
                self.pending.lock().await.remove(&id);
                return Err(TransportError::Lost {
                    message: format!("flush failed: {e}"),
                });
            }
        }

        let reply = rx.await.map_err(|_| TransportError::Lost {
            message: "tool server closed the stream".to_string(),
        })?;
        unwrap_reply(reply)
    }

    async fn close(&self) {
        self.reader.abort();
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            debug!(error = %e, "tool server already exited");
        }
    }
}

/// HTTP endpoint accepting JSON-RPC envelopes via POST.
///
/// HTTP calls carry their correlation in the request/response pair, so
/// invocations may run concurrently without a pending map.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(url: &str, headers: &FxHashMap<String, String>) -> Result<Self, TransportError> {
        let mut header_map = reqwest::header::HeaderMap::new();
        for (k, v) in headers {
            let name = reqwest::header::HeaderName::from_bytes(k.as_bytes()).map_err(|e| {
                TransportError::Protocol {
                    message: format!("invalid header name {k}: {e}"),
                }
            })?;
            let value =
                reqwest::header::HeaderValue::from_str(v).map_err(|e| TransportError::Protocol {
                    message: format!("invalid header value for {k}: {e}"),
                })?;
            header_map.insert(name, value);
        }
        let client = reqwest::Client::builder()
            .default_headers(header_map)
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/mcp/v1", url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl ToolTransport for HttpTransport {
    async fn request(&self, method: &str, params: Value, id: u64) -> Result<Value, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&envelope(method, params, id))
            .send()
            .await?
            .error_for_status()?;
        let reply: Value = response.json().await?;

        // The reply must echo our correlation id.
        if reply.get("id").and_then(Value::as_u64) != Some(id) {
            return Err(TransportError::Protocol {
                message: "reply id does not match request id".to_string(),
            });
        }
        unwrap_reply(reply)
    }

    async fn close(&self) {}
}

/// Well-known method names of the tool-server wire protocol.
pub mod methods {
    pub const HANDSHAKE: &str = "initialize";
    pub const LIST_TOOLS: &str = "tools/list";
    pub const INVOKE: &str = "tools/call";
    pub const SHUTDOWN: &str = "shutdown";
}
