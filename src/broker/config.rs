//! Tool-server configuration: the sidecar document of server descriptors.
//!
//! The document lists servers to register at runtime start. Each entry has a
//! unique name, a transport tag, and transport-specific fields. Absence of
//! the document means no external tools.
//!
//! ```json
//! {
//!   "servers": [
//!     {
//!       "name": "files",
//!       "transport": "stdio",
//!       "command": "file-tools",
//!       "args": ["--readonly"],
//!       "env": {"LOG": "warn"}
//!     },
//!     {
//!       "name": "search",
//!       "transport": "http",
//!       "url": "http://localhost:8750",
//!       "headers": {"authorization": "Bearer dev"}
//!     }
//!   ]
//! }
//! ```

use std::path::Path;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::BrokerError;

/// Transport-specific connection settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum TransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: FxHashMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: FxHashMap<String, String>,
    },
}

/// One tool-server descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolServerConfig {
    pub name: String,
    #[serde(flatten)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct ToolServerDocument {
    #[serde(default)]
    servers: Vec<ToolServerConfig>,
}

/// Loads the sidecar document. A missing file yields an empty server list.
pub fn load_tool_servers(path: impl AsRef<Path>) -> Result<Vec<ToolServerConfig>, BrokerError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let text = std::fs::read_to_string(path).map_err(|source| BrokerError::ConfigIo {
        path: path.display().to_string(),
        source,
    })?;
    let document: ToolServerDocument =
        serde_json::from_str(&text).map_err(|source| BrokerError::ConfigParse {
            path: path.display().to_string(),
            source,
        })?;
    Ok(document.servers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdio_descriptor_round_trip() {
        let config = ToolServerConfig {
            name: "files".into(),
            transport: TransportConfig::Stdio {
                command: "file-tools".into(),
                args: vec!["--readonly".into()],
                env: FxHashMap::default(),
                cwd: None,
            },
            description: "filesystem tools".into(),
        };
        let text = serde_json::to_string(&config).unwrap();
        assert!(text.contains("\"transport\":\"stdio\""));
        let back: ToolServerConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn http_descriptor_parses() {
        let text = r#"{"name": "search", "transport": "http", "url": "http://localhost:1"}"#;
        let config: ToolServerConfig = serde_json::from_str(text).unwrap();
        assert!(matches!(config.transport, TransportConfig::Http { .. }));
    }

    #[test]
    fn missing_document_means_no_tools() {
        let servers = load_tool_servers("/nonexistent/tool_servers.json").unwrap();
        assert!(servers.is_empty());
    }

    #[test]
    fn document_with_servers_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tool_servers.json");
        std::fs::write(
            &path,
            r#"{"servers": [{"name": "s", "transport": "http", "url": "http://localhost:1"}]}"#,
        )
        .unwrap();
        let servers = load_tool_servers(&path).unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].name, "s");
    }
}
