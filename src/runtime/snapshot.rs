//! Persisted run snapshots.
//!
//! A suspended run materializes to a per-run directory of JSON documents:
//!
//! | File | Contents |
//! |---|---|
//! | `memory.json` | memory plane contents |
//! | `visits.json` | visit counter |
//! | `position.json` | graph reference, current node, status, pending payload, metrics |
//! | `transcript.json` | in-progress conversation, when one exists |
//!
//! The serde-friendly [`PersistedRun`] shape is decoupled from the in-memory
//! [`RunState`]; conversion glue lives here so the stores stay lean. No
//! forward/backward compatibility is promised within a major version.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::memory::MemoryPlane;
use crate::message::Message;
use crate::recorder::RunMetrics;
use crate::scheduler::RunState;
use crate::types::{RunId, RunStatus};

#[derive(Debug, Error, Diagnostic)]
pub enum SnapshotError {
    #[error("snapshot I/O failed at {path}: {source}")]
    #[diagnostic(code(goalgraph::snapshot::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot serialization failed: {source}")]
    #[diagnostic(code(goalgraph::snapshot::serde))]
    Serde {
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot for run {run} is corrupt: {message}")]
    #[diagnostic(
        code(goalgraph::snapshot::corrupt),
        help("Delete the run directory; suspended state cannot be recovered from a partial snapshot.")
    )]
    Corrupt { run: String, message: String },
}

/// The complete persisted form of a suspended (or finished) run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PersistedRun {
    pub run_id: String,
    /// Graph reference: the id of the graph document this run executes.
    pub graph_id: String,
    pub status: RunStatus,
    pub memory: BTreeMap<String, Value>,
    pub visits: BTreeMap<String, u32>,
    pub current_node: Option<String>,
    pub pending_message: Option<String>,
    #[serde(default)]
    pub transcript: Vec<Message>,
    #[serde(default)]
    pub metrics: RunMetrics,
    /// RFC3339 creation time of the snapshot.
    pub created_at: String,
}

impl PersistedRun {
    /// Captures a run state for persistence.
    #[must_use]
    pub fn capture(state: &RunState, graph_id: &str) -> Self {
        Self {
            run_id: state.run_id.to_string(),
            graph_id: graph_id.to_string(),
            status: state.status.clone(),
            memory: state.memory.snapshot().into_iter().collect(),
            visits: state.visits.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            current_node: state.current_node.clone(),
            pending_message: state.pending_message.clone(),
            transcript: state.transcript.clone().unwrap_or_default(),
            metrics: state.metrics,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    /// Restores the in-memory run state.
    #[must_use]
    pub fn restore(&self) -> RunState {
        let payload: FxHashMap<String, Value> = self
            .memory
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        RunState {
            run_id: RunId::from(self.run_id.clone()),
            status: self.status.clone(),
            memory: MemoryPlane::from_payload(&payload),
            visits: self.visits.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            current_node: self.current_node.clone(),
            pending_message: self.pending_message.clone(),
            transcript: if self.transcript.is_empty() {
                None
            } else {
                Some(self.transcript.clone())
            },
            last_output: None,
            metrics: self.metrics,
        }
    }
}

/// Pluggable persistence backend for run snapshots.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn save(&self, snapshot: &PersistedRun) -> Result<(), SnapshotError>;
    async fn load(&self, run_id: &str) -> Result<Option<PersistedRun>, SnapshotError>;
    async fn list(&self) -> Result<Vec<String>, SnapshotError>;
}

/// Filesystem store: one directory per run under a configured root.
pub struct FsSnapshotStore {
    root: PathBuf,
}

/// The position document groups everything that is not memory, visits, or
/// transcript.
#[derive(Serialize, Deserialize)]
struct PositionDoc {
    run_id: String,
    graph_id: String,
    status: RunStatus,
    current_node: Option<String>,
    pending_message: Option<String>,
    metrics: RunMetrics,
    created_at: String,
}

impl FsSnapshotStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    fn write_doc<T: Serialize>(path: &Path, value: &T) -> Result<(), SnapshotError> {
        let text =
            serde_json::to_string_pretty(value).map_err(|source| SnapshotError::Serde { source })?;
        std::fs::write(path, text).map_err(|source| SnapshotError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    fn read_doc<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, SnapshotError> {
        let text = std::fs::read_to_string(path).map_err(|source| SnapshotError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SnapshotError::Serde { source })
    }
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    async fn save(&self, snapshot: &PersistedRun) -> Result<(), SnapshotError> {
        let dir = self.run_dir(&snapshot.run_id);
        std::fs::create_dir_all(&dir).map_err(|source| SnapshotError::Io {
            path: dir.display().to_string(),
            source,
        })?;

        Self::write_doc(&dir.join("memory.json"), &snapshot.memory)?;
        Self::write_doc(&dir.join("visits.json"), &snapshot.visits)?;
        Self::write_doc(
            &dir.join("position.json"),
            &PositionDoc {
                run_id: snapshot.run_id.clone(),
                graph_id: snapshot.graph_id.clone(),
                status: snapshot.status.clone(),
                current_node: snapshot.current_node.clone(),
                pending_message: snapshot.pending_message.clone(),
                metrics: snapshot.metrics,
                created_at: snapshot.created_at.clone(),
            },
        )?;
        Self::write_doc(&dir.join("transcript.json"), &snapshot.transcript)?;
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<PersistedRun>, SnapshotError> {
        let dir = self.run_dir(run_id);
        if !dir.exists() {
            return Ok(None);
        }

        let position: PositionDoc = Self::read_doc(&dir.join("position.json"))?;
        if position.run_id != run_id {
            return Err(SnapshotError::Corrupt {
                run: run_id.to_string(),
                message: format!("position document names run {}", position.run_id),
            });
        }
        let memory: BTreeMap<String, Value> = Self::read_doc(&dir.join("memory.json"))?;
        let visits: BTreeMap<String, u32> = Self::read_doc(&dir.join("visits.json"))?;
        let transcript: Vec<Message> = Self::read_doc(&dir.join("transcript.json"))?;

        Ok(Some(PersistedRun {
            run_id: position.run_id,
            graph_id: position.graph_id,
            status: position.status,
            memory,
            visits,
            current_node: position.current_node,
            pending_message: position.pending_message,
            transcript,
            metrics: position.metrics,
            created_at: position.created_at,
        }))
    }

    async fn list(&self) -> Result<Vec<String>, SnapshotError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.root).map_err(|source| SnapshotError::Io {
            path: self.root.display().to_string(),
            source,
        })?;
        let mut runs = Vec::new();
        for entry in entries.flatten() {
            if entry.path().is_dir() {
                runs.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        runs.sort();
        Ok(runs)
    }
}

/// Volatile store for tests and embedded hosts.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: Mutex<FxHashMap<String, PersistedRun>>,
}

impl InMemorySnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: &PersistedRun) -> Result<(), SnapshotError> {
        self.snapshots
            .lock()
            .await
            .insert(snapshot.run_id.clone(), snapshot.clone());
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<PersistedRun>, SnapshotError> {
        Ok(self.snapshots.lock().await.get(run_id).cloned())
    }

    async fn list(&self) -> Result<Vec<String>, SnapshotError> {
        let mut runs: Vec<String> = self.snapshots.lock().await.keys().cloned().collect();
        runs.sort();
        Ok(runs)
    }
}
