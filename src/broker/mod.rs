//! The tool broker: registry of external tool servers and the single dispatch
//! point for tool invocations.
//!
//! The broker owns one transport per registered server and a cached tool
//! catalogue discovered at registration. Invocations are correlated by id:
//! the reply handed back to a node carries exactly the correlation id the
//! broker sent, and late replies for abandoned calls are discarded at the
//! transport layer.
//!
//! Failure policy:
//! - A structured error from the tool server is *not* a broker failure — it
//!   is returned as a [`ToolOutcome`] with `is_error` set, for the LLM to
//!   observe and react to.
//! - A transport-level disconnect fails the call with `TransportLost` after
//!   one reconnect attempt (config-backed servers only).
//! - The per-call deadline converts to a `Deadline` error.
//!
//! Name collisions across servers resolve first-registered-wins and are
//! reported back to the caller so they can be flagged as problems in the run
//! trace.

pub mod config;
pub mod transport;

pub use config::{load_tool_servers, ToolServerConfig, TransportConfig};
pub use transport::{methods, HttpTransport, StdioTransport, ToolTransport, TransportError};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::provider::ToolSchema;

#[derive(Debug, Error, Diagnostic)]
pub enum BrokerError {
    #[error("failed to read tool-server document {path}: {source}")]
    #[diagnostic(code(goalgraph::broker::config_io))]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tool-server document {path} does not parse: {source}")]
    #[diagnostic(code(goalgraph::broker::config_parse))]
    ConfigParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("tool server {server} is already registered")]
    #[diagnostic(code(goalgraph::broker::duplicate_server))]
    DuplicateServer { server: String },

    #[error("failed to connect to tool server {server}: {source}")]
    #[diagnostic(
        code(goalgraph::broker::connect),
        help("Connection failure is fatal for registration; fix the descriptor and retry.")
    )]
    Connect {
        server: String,
        #[source]
        source: TransportError,
    },

    #[error("handshake with tool server {server} failed: {source}")]
    #[diagnostic(code(goalgraph::broker::handshake))]
    Handshake {
        server: String,
        #[source]
        source: TransportError,
    },

    #[error("tool server {server} returned a malformed catalogue: {message}")]
    #[diagnostic(code(goalgraph::broker::catalogue))]
    Catalogue { server: String, message: String },

    #[error("no registered server exposes tool: {name}")]
    #[diagnostic(code(goalgraph::broker::unknown_tool))]
    UnknownTool { name: String },

    #[error("tool server not registered: {name}")]
    #[diagnostic(code(goalgraph::broker::server_not_registered))]
    ServerNotRegistered { name: String },

    #[error("tool call {tool} exceeded the {millis}ms deadline")]
    #[diagnostic(code(goalgraph::broker::deadline))]
    Deadline { tool: String, millis: u64 },

    #[error("transport lost during tool call {tool}: {message}")]
    #[diagnostic(code(goalgraph::broker::transport_lost))]
    TransportLost { tool: String, message: String },
}

/// One catalogued tool: where it lives and how to call it.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema of the tool's parameters.
    pub parameters: Value,
    pub server: String,
}

impl ToolDescriptor {
    /// The schema form presented to the LLM provider.
    #[must_use]
    pub fn to_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Result of a tool invocation as observed by the calling node.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutcome {
    /// Echo of the correlation id the broker sent.
    pub correlation_id: u64,
    pub content: Value,
    /// Structured tool error; surfaced to the LLM, never a node failure.
    pub is_error: bool,
}

/// Outcome of a registration: discovered tools plus any name collisions.
#[derive(Debug)]
pub struct RegisterReport {
    pub server: String,
    pub tools: Vec<ToolDescriptor>,
    /// Tool names already owned by an earlier registration.
    pub collisions: Vec<String>,
}

struct ServerEntry {
    transport: Arc<dyn ToolTransport>,
    /// Present for config-backed servers; enables the single reconnect.
    config: Option<ToolServerConfig>,
}

/// Registry of tool servers shared by all runs in a process.
pub struct ToolBroker {
    servers: Mutex<FxHashMap<String, ServerEntry>>,
    /// Catalogue in registration order; first entry wins on name collision.
    catalogue: Mutex<Vec<ToolDescriptor>>,
    correlation: AtomicU64,
    call_timeout: Duration,
}

impl ToolBroker {
    #[must_use]
    pub fn new(call_timeout: Duration) -> Self {
        Self {
            servers: Mutex::new(FxHashMap::default()),
            catalogue: Mutex::new(Vec::new()),
            correlation: AtomicU64::new(1),
            call_timeout,
        }
    }

    /// Mints the next correlation id.
    pub fn next_correlation_id(&self) -> u64 {
        self.correlation.fetch_add(1, Ordering::SeqCst)
    }

    /// Opens the transport for a descriptor, performs the handshake, and
    /// caches the discovered catalogue. Connection failure is fatal.
    pub async fn register(&self, config: ToolServerConfig) -> Result<RegisterReport, BrokerError> {
        let name = config.name.clone();
        let transport =
            transport::connect(&config)
                .await
                .map_err(|source| BrokerError::Connect {
                    server: name.clone(),
                    source,
                })?;
        self.register_entry(&name, Arc::from(transport), Some(config))
            .await
    }

    /// Registers a server over an already-open transport.
    ///
    /// Used by tests and by hosts that manage their own connections. Servers
    /// registered this way cannot be reconnected automatically.
    pub async fn register_transport(
        &self,
        name: &str,
        transport: Arc<dyn ToolTransport>,
    ) -> Result<RegisterReport, BrokerError> {
        self.register_entry(name, transport, None).await
    }

    async fn register_entry(
        &self,
        name: &str,
        transport: Arc<dyn ToolTransport>,
        config: Option<ToolServerConfig>,
    ) -> Result<RegisterReport, BrokerError> {
        if self.servers.lock().await.contains_key(name) {
            return Err(BrokerError::DuplicateServer {
                server: name.to_string(),
            });
        }

        let handshake = transport
            .request(
                methods::HANDSHAKE,
                json!({"client": {"name": "goalgraph", "version": env!("CARGO_PKG_VERSION")}}),
                self.next_correlation_id(),
            )
            .await;
        if let Err(source) = handshake {
            transport.close().await;
            return Err(BrokerError::Handshake {
                server: name.to_string(),
                source,
            });
        }

        let listing = match transport
            .request(methods::LIST_TOOLS, json!({}), self.next_correlation_id())
            .await
        {
            Ok(listing) => listing,
            Err(source) => {
                transport.close().await;
                return Err(BrokerError::Handshake {
                    server: name.to_string(),
                    source,
                });
            }
        };
        let tools = parse_catalogue(name, &listing)?;

        let mut catalogue = self.catalogue.lock().await;
        let collisions: Vec<String> = tools
            .iter()
            .filter(|t| catalogue.iter().any(|existing| existing.name == t.name))
            .map(|t| t.name.clone())
            .collect();
        for collision in &collisions {
            warn!(server = %name, tool = %collision, "tool name collision; first-registered wins");
        }
        catalogue.extend(tools.clone());
        drop(catalogue);

        self.servers
            .lock()
            .await
            .insert(name.to_string(), ServerEntry { transport, config });

        info!(server = %name, tools = tools.len(), "tool server registered");
        Ok(RegisterReport {
            server: name.to_string(),
            tools,
            collisions,
        })
    }

    /// Returns the cached catalogue, optionally filtered to one server.
    pub async fn list_tools(&self, server: Option<&str>) -> Vec<ToolDescriptor> {
        let catalogue = self.catalogue.lock().await;
        match server {
            Some(name) => catalogue
                .iter()
                .filter(|t| t.server == name)
                .cloned()
                .collect(),
            None => catalogue.clone(),
        }
    }

    /// Schemas for the named tools, in the order given.
    ///
    /// Unknown names are skipped; the executor surfaces them when the model
    /// actually calls one.
    pub async fn tool_schemas(&self, names: &[String]) -> Vec<ToolSchema> {
        let catalogue = self.catalogue.lock().await;
        names
            .iter()
            .filter_map(|name| {
                catalogue
                    .iter()
                    .find(|t| &t.name == name)
                    .map(ToolDescriptor::to_schema)
            })
            .collect()
    }

    /// Dispatches one tool call and blocks until the correlated reply arrives
    /// or the per-call deadline expires.
    pub async fn invoke(
        &self,
        tool_name: &str,
        arguments: Value,
        correlation_id: u64,
    ) -> Result<ToolOutcome, BrokerError> {
        let server_name = {
            let catalogue = self.catalogue.lock().await;
            catalogue
                .iter()
                .find(|t| t.name == tool_name)
                .map(|t| t.server.clone())
                .ok_or_else(|| BrokerError::UnknownTool {
                    name: tool_name.to_string(),
                })?
        };

        let transport = self.transport_for(&server_name).await?;
        let params = json!({"name": tool_name, "arguments": arguments});

        let first = self
            .dispatch(&transport, tool_name, params.clone(), correlation_id)
            .await;
        match first {
            Err(BrokerError::TransportLost { message, .. }) => {
                // One reconnect attempt, then surface the loss.
                debug!(server = %server_name, tool = %tool_name, "transport lost; attempting reconnect");
                let transport = self.reconnect(&server_name).await.map_err(|_| {
                    BrokerError::TransportLost {
                        tool: tool_name.to_string(),
                        message,
                    }
                })?;
                self.dispatch(&transport, tool_name, params, correlation_id)
                    .await
            }
            other => other,
        }
    }

    async fn dispatch(
        &self,
        transport: &Arc<dyn ToolTransport>,
        tool_name: &str,
        params: Value,
        correlation_id: u64,
    ) -> Result<ToolOutcome, BrokerError> {
        let call = transport.request(methods::INVOKE, params, correlation_id);
        match tokio::time::timeout(self.call_timeout, call).await {
            Err(_) => Err(BrokerError::Deadline {
                tool: tool_name.to_string(),
                millis: self.call_timeout.as_millis() as u64,
            }),
            Ok(Err(TransportError::Rpc { message })) => Ok(ToolOutcome {
                correlation_id,
                content: json!({"error": message}),
                is_error: true,
            }),
            Ok(Err(TransportError::Lost { message })) => Err(BrokerError::TransportLost {
                tool: tool_name.to_string(),
                message,
            }),
            Ok(Err(other)) => Err(BrokerError::TransportLost {
                tool: tool_name.to_string(),
                message: other.to_string(),
            }),
            Ok(Ok(result)) => Ok(interpret_result(correlation_id, result)),
        }
    }

    async fn transport_for(&self, server: &str) -> Result<Arc<dyn ToolTransport>, BrokerError> {
        let servers = self.servers.lock().await;
        servers
            .get(server)
            .map(|entry| entry.transport.clone())
            .ok_or_else(|| BrokerError::ServerNotRegistered {
                name: server.to_string(),
            })
    }

    /// Re-opens a config-backed server's transport in place.
    async fn reconnect(&self, server: &str) -> Result<Arc<dyn ToolTransport>, BrokerError> {
        let config = {
            let servers = self.servers.lock().await;
            servers
                .get(server)
                .and_then(|entry| entry.config.clone())
                .ok_or_else(|| BrokerError::ServerNotRegistered {
                    name: server.to_string(),
                })?
        };

        let transport: Arc<dyn ToolTransport> = Arc::from(
            transport::connect(&config)
                .await
                .map_err(|source| BrokerError::Connect {
                    server: server.to_string(),
                    source,
                })?,
        );

        let mut servers = self.servers.lock().await;
        if let Some(entry) = servers.get_mut(server) {
            entry.transport = transport.clone();
        }
        info!(server = %server, "tool server reconnected");
        Ok(transport)
    }

    /// Closes the server's transport and removes its catalogue entries.
    pub async fn unregister(&self, name: &str) -> Result<(), BrokerError> {
        let entry = self.servers.lock().await.remove(name).ok_or_else(|| {
            BrokerError::ServerNotRegistered {
                name: name.to_string(),
            }
        })?;

        // Best-effort shutdown notice; the server may already be gone.
        let _ = tokio::time::timeout(
            Duration::from_millis(250),
            entry
                .transport
                .request(methods::SHUTDOWN, json!({}), self.next_correlation_id()),
        )
        .await;
        entry.transport.close().await;

        self.catalogue.lock().await.retain(|t| t.server != name);
        info!(server = %name, "tool server unregistered");
        Ok(())
    }

    /// Names of all registered servers.
    pub async fn servers(&self) -> Vec<String> {
        self.servers.lock().await.keys().cloned().collect()
    }
}

fn parse_catalogue(server: &str, listing: &Value) -> Result<Vec<ToolDescriptor>, BrokerError> {
    let entries = listing
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| BrokerError::Catalogue {
            server: server.to_string(),
            message: "listing carries no tools array".to_string(),
        })?;

    let mut tools = Vec::with_capacity(entries.len());
    for entry in entries {
        let name = entry
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| BrokerError::Catalogue {
                server: server.to_string(),
                message: "tool entry carries no name".to_string(),
            })?;
        tools.push(ToolDescriptor {
            name: name.to_string(),
            description: entry
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            parameters: entry
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| json!({"type": "object"})),
            server: server.to_string(),
        });
    }
    Ok(tools)
}

/// Maps a wire-level invocation result onto a [`ToolOutcome`].
///
/// Results shaped `{content, isError}` unwrap; anything else passes through
/// as the content itself.
fn interpret_result(correlation_id: u64, result: Value) -> ToolOutcome {
    match result.as_object() {
        Some(object) if object.contains_key("content") => ToolOutcome {
            correlation_id,
            is_error: object
                .get("isError")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            content: object.get("content").cloned().unwrap_or(Value::Null),
        },
        _ => ToolOutcome {
            correlation_id,
            content: result,
            is_error: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_catalogue_reads_mcp_listing() {
        let listing = json!({
            "tools": [
                {"name": "search", "description": "web search", "inputSchema": {"type": "object"}},
                {"name": "fetch"}
            ]
        });
        let tools = parse_catalogue("srv", &listing).unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "search");
        assert_eq!(tools[0].server, "srv");
        assert_eq!(tools[1].description, "");
    }

    #[test]
    fn parse_catalogue_rejects_missing_tools() {
        assert!(matches!(
            parse_catalogue("srv", &json!({})),
            Err(BrokerError::Catalogue { .. })
        ));
    }

    #[test]
    fn interpret_result_unwraps_content_shape() {
        let outcome = interpret_result(9, json!({"content": [{"text": "hi"}], "isError": false}));
        assert_eq!(outcome.correlation_id, 9);
        assert!(!outcome.is_error);
        assert_eq!(outcome.content, json!([{"text": "hi"}]));
    }

    #[test]
    fn interpret_result_passes_raw_values_through() {
        let outcome = interpret_result(3, json!({"hits": 2}));
        assert_eq!(outcome.content, json!({"hits": 2}));
        assert!(!outcome.is_error);
    }

    #[test]
    fn correlation_ids_are_monotonic() {
        let broker = ToolBroker::new(Duration::from_secs(1));
        let a = broker.next_correlation_id();
        let b = broker.next_correlation_id();
        assert!(b > a);
    }
}
