//! Host-facing runtime: the operations a surrounding CLI/TUI/SDK calls.
//!
//! A [`Runtime`] wires the collaborators together — graph validation, the
//! per-run scheduler, the shared tool broker, the trace bus, and the snapshot
//! store — and exposes:
//!
//! - `run(graph, input)` → run id
//! - `resume(run_id, input)` → run id
//! - `status(run_id)` → state, current node, last output
//! - `cancel(run_id)`
//! - `register_tool_server(descriptor)` / `unregister_tool_server(name)`
//!
//! Runs execute one node at a time on the caller's task; independent runs may
//! execute concurrently as independent `run` calls. The only mutable state
//! they share is the broker's server registry.

pub mod config;
pub mod snapshot;

pub use config::RuntimeConfig;
pub use snapshot::{FsSnapshotStore, InMemorySnapshotStore, PersistedRun, SnapshotError, SnapshotStore};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::broker::{BrokerError, ToolBroker, ToolServerConfig};
use crate::executors::{FunctionRegistry, ResumedConversation};
use crate::graph::loader::GraphError;
use crate::graph::spec::{GraphSpec, DEFAULT_ENTRY_POINT, RESUME_INPUT_KEY};
use crate::memory::MemoryPlane;
use crate::provider::LlmProvider;
use crate::recorder::{Recorder, RecorderSink, TraceBus};
use crate::scheduler::{RunOutcome, RunState, Scheduler, SchedulerError};
use crate::types::{NodeType, RunId, RunStatus, Severity};
use crate::utils::id;

#[derive(Debug, Error, Diagnostic)]
pub enum RuntimeError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Broker(#[from] BrokerError),

    #[error("unknown run: {run_id}")]
    #[diagnostic(code(goalgraph::runtime::unknown_run))]
    UnknownRun { run_id: String },

    #[error("run {run_id} is not suspended (state: {status})")]
    #[diagnostic(code(goalgraph::runtime::not_suspended))]
    NotSuspended { run_id: String, status: RunStatus },

    #[error("snapshot references graph {graph_id}, which this runtime has not seen")]
    #[diagnostic(
        code(goalgraph::runtime::unknown_graph),
        help("Start at least one run of the graph in this process before resuming its snapshots.")
    )]
    UnknownGraph { graph_id: String },

    #[error("function node {node} has no registered binding")]
    #[diagnostic(
        code(goalgraph::runtime::missing_binding),
        help("Bind every function node id before starting the run.")
    )]
    MissingBinding { node: String },
}

/// Reply of the `status` operation.
#[derive(Clone, Debug, PartialEq)]
pub struct StatusReport {
    pub state: RunStatus,
    pub current_node: Option<String>,
    pub last_output: Option<Value>,
}

struct RunSlot {
    graph: Arc<GraphSpec>,
    cancel: Arc<AtomicBool>,
    state: Arc<Mutex<RunState>>,
}

/// The runtime a host embeds.
pub struct Runtime {
    config: RuntimeConfig,
    provider: Option<Arc<dyn LlmProvider>>,
    functions: Arc<FunctionRegistry>,
    broker: Arc<ToolBroker>,
    bus: TraceBus,
    /// Trace handle for registry-level events (tool name collisions).
    broker_recorder: Recorder,
    store: Arc<dyn SnapshotStore>,
    runs: Mutex<FxHashMap<String, RunSlot>>,
    graphs: Mutex<FxHashMap<String, Arc<GraphSpec>>>,
}

impl Runtime {
    /// Builds a runtime with the filesystem snapshot store and stdout trace
    /// sink implied by the configuration.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        let store = Arc::new(FsSnapshotStore::new(config.snapshot_dir.clone()));
        Self::with_parts(config, store, TraceBus::default())
    }

    /// Builds a runtime around explicit persistence and trace sinks.
    #[must_use]
    pub fn with_store_and_sinks(
        config: RuntimeConfig,
        store: Arc<dyn SnapshotStore>,
        sinks: Vec<Box<dyn RecorderSink>>,
    ) -> Self {
        Self::with_parts(config, store, TraceBus::with_sinks(sinks))
    }

    fn with_parts(config: RuntimeConfig, store: Arc<dyn SnapshotStore>, bus: TraceBus) -> Self {
        let broker = Arc::new(ToolBroker::new(config.tool_call_timeout));
        bus.listen();
        let broker_recorder = bus.recorder_for(RunId::from("tool-broker"));
        Self {
            config,
            provider: None,
            functions: Arc::new(FunctionRegistry::new()),
            broker,
            bus,
            broker_recorder,
            store,
            runs: Mutex::new(FxHashMap::default()),
            graphs: Mutex::new(FxHashMap::default()),
        }
    }

    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    #[must_use]
    pub fn with_functions(mut self, functions: FunctionRegistry) -> Self {
        self.functions = Arc::new(functions);
        self
    }

    #[must_use]
    pub fn broker(&self) -> Arc<ToolBroker> {
        self.broker.clone()
    }

    /// Starts a run of `graph` from the default entry point and drives it
    /// until it completes, fails, or suspends. Returns the run id either way;
    /// `status` reports where it ended up.
    #[instrument(skip(self, graph, input), fields(graph = %graph.id))]
    pub async fn run(
        &self,
        graph: GraphSpec,
        input: FxHashMap<String, Value>,
    ) -> Result<RunId, RuntimeError> {
        crate::graph::loader::check(&graph)?;
        for node in graph.nodes.iter().filter(|n| n.node_type == NodeType::Function) {
            if !self.functions.has(&node.id) {
                return Err(RuntimeError::MissingBinding {
                    node: node.id.clone(),
                });
            }
        }

        let graph = Arc::new(graph);
        self.graphs
            .lock()
            .await
            .insert(graph.id.clone(), graph.clone());

        let run_id = RunId::from(id::run_id());
        let recorder = self.bus.recorder_for(run_id.clone());
        recorder.run_started(graph.goal.as_ref(), &input);

        let state = RunState::new(run_id.clone(), MemoryPlane::from_payload(&input));
        let cancel = Arc::new(AtomicBool::new(false));
        let slot = RunSlot {
            graph: graph.clone(),
            cancel: cancel.clone(),
            state: Arc::new(Mutex::new(state)),
        };
        let state_handle = slot.state.clone();
        self.runs.lock().await.insert(run_id.to_string(), slot);

        let scheduler = Scheduler::new(
            graph.clone(),
            self.provider.clone(),
            Some(self.broker.clone()),
            self.functions.clone(),
            recorder,
            self.config.loop_limits(),
            self.config.run_deadline,
            cancel,
        );

        let mut state = state_handle.lock().await;
        let outcome = scheduler
            .drive(&mut state, DEFAULT_ENTRY_POINT, None)
            .await?;
        self.persist_if_suspended(&state, &graph, &outcome).await?;
        info!(run = %run_id, ?outcome, "run returned");
        Ok(run_id)
    }

    /// Resumes a suspended run with the user's reply.
    ///
    /// The reply payload is written into the memory plane (one key per
    /// entry), the `<pause-node>_resume` entry point is scheduled next, and
    /// — when that entry point maps back to the pause node itself — the
    /// persisted transcript is continued instead of starting fresh.
    #[instrument(skip(self, input), fields(run = %run_id))]
    pub async fn resume(
        &self,
        run_id: &RunId,
        input: FxHashMap<String, Value>,
    ) -> Result<RunId, RuntimeError> {
        let (graph, state_handle, cancel) = self.slot_for_resume(run_id).await?;

        let mut state = state_handle.lock().await;
        if !state.status.is_suspended() {
            return Err(RuntimeError::NotSuspended {
                run_id: run_id.to_string(),
                status: state.status.clone(),
            });
        }

        let pause_node = state.current_node.clone().ok_or_else(|| {
            RuntimeError::UnknownRun {
                run_id: run_id.to_string(),
            }
        })?;
        let resume_entry = GraphSpec::resume_entry_name(&pause_node);
        if graph.entry_point(&resume_entry).is_none() {
            return Err(SchedulerError::UnknownEntryPoint {
                graph: graph.id.clone(),
                name: resume_entry,
            }
            .into());
        }

        for (key, value) in &input {
            state.memory.write(key, value.clone());
        }

        // Same-node resume continues the persisted conversation.
        let resumed = match (graph.entry_point(&resume_entry), state.transcript.take()) {
            (Some(target), Some(transcript)) if target == pause_node => {
                let reply = match input.get(RESUME_INPUT_KEY) {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => serde_json::to_string(&input).unwrap_or_default(),
                };
                Some(ResumedConversation { transcript, reply })
            }
            _ => None,
        };

        let recorder = self.bus.recorder_for(run_id.clone());
        let scheduler = Scheduler::new(
            graph.clone(),
            self.provider.clone(),
            Some(self.broker.clone()),
            self.functions.clone(),
            recorder,
            self.config.loop_limits(),
            self.config.run_deadline,
            cancel,
        );

        state.current_node = None;
        let outcome = scheduler.drive(&mut state, &resume_entry, resumed).await?;
        self.persist_if_suspended(&state, &graph, &outcome).await?;
        info!(run = %run_id, ?outcome, "resume returned");
        Ok(run_id.clone())
    }

    /// Reports a run's state, current node, and last output.
    pub async fn status(&self, run_id: &RunId) -> Result<StatusReport, RuntimeError> {
        let runs = self.runs.lock().await;
        if let Some(slot) = runs.get(run_id.as_str()) {
            return Ok(match slot.state.try_lock() {
                Ok(state) => StatusReport {
                    state: state.status.clone(),
                    current_node: state.current_node.clone(),
                    last_output: state.last_output.clone(),
                },
                // The scheduler holds the lock while driving.
                Err(_) => StatusReport {
                    state: RunStatus::Running,
                    current_node: None,
                    last_output: None,
                },
            });
        }
        drop(runs);

        match self.store.load(run_id.as_str()).await? {
            Some(snapshot) => Ok(StatusReport {
                state: snapshot.status,
                current_node: snapshot.current_node,
                last_output: None,
            }),
            None => Err(RuntimeError::UnknownRun {
                run_id: run_id.to_string(),
            }),
        }
    }

    /// Requests cancellation. The currently-running node is allowed to return
    /// or fail; no new nodes are scheduled afterwards.
    pub async fn cancel(&self, run_id: &RunId) -> Result<(), RuntimeError> {
        let runs = self.runs.lock().await;
        let slot = runs
            .get(run_id.as_str())
            .ok_or_else(|| RuntimeError::UnknownRun {
                run_id: run_id.to_string(),
            })?;
        slot.cancel.store(true, Ordering::SeqCst);
        info!(run = %run_id, "cancellation requested");
        Ok(())
    }

    /// Registers a tool server; connection failure is fatal for registration.
    ///
    /// Catalogue name collisions are flagged as problems on the broker's
    /// registry trace.
    pub async fn register_tool_server(&self, config: ToolServerConfig) -> Result<(), RuntimeError> {
        let report = self.broker.register(config).await?;
        if !report.collisions.is_empty() {
            for name in &report.collisions {
                self.broker_recorder.problem(
                    Severity::Warning,
                    None,
                    &format!(
                        "tool {name} from server {} shadowed by an earlier registration",
                        report.server
                    ),
                    Some("rename the tool or register this server first"),
                );
            }
        }
        Ok(())
    }

    pub async fn unregister_tool_server(&self, name: &str) -> Result<(), RuntimeError> {
        self.broker.unregister(name).await?;
        Ok(())
    }

    /// Loads the tool-server sidecar document and registers every entry.
    /// A missing document means no external tools.
    pub async fn load_tool_servers(
        &self,
        path: impl AsRef<std::path::Path>,
    ) -> Result<usize, RuntimeError> {
        let servers = crate::broker::load_tool_servers(path)?;
        let count = servers.len();
        for server in servers {
            self.register_tool_server(server).await?;
        }
        Ok(count)
    }

    async fn persist_if_suspended(
        &self,
        state: &RunState,
        graph: &GraphSpec,
        outcome: &RunOutcome,
    ) -> Result<(), RuntimeError> {
        if matches!(outcome, RunOutcome::Suspended { .. }) {
            let snapshot = PersistedRun::capture(state, &graph.id);
            self.store.save(&snapshot).await?;
        }
        Ok(())
    }

    async fn slot_for_resume(
        &self,
        run_id: &RunId,
    ) -> Result<(Arc<GraphSpec>, Arc<Mutex<RunState>>, Arc<AtomicBool>), RuntimeError> {
        {
            let runs = self.runs.lock().await;
            if let Some(slot) = runs.get(run_id.as_str()) {
                return Ok((slot.graph.clone(), slot.state.clone(), slot.cancel.clone()));
            }
        }

        // Not in memory: restore from the snapshot store (fresh process).
        let snapshot = self
            .store
            .load(run_id.as_str())
            .await?
            .ok_or_else(|| RuntimeError::UnknownRun {
                run_id: run_id.to_string(),
            })?;
        let graph = self
            .graphs
            .lock()
            .await
            .get(&snapshot.graph_id)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownGraph {
                graph_id: snapshot.graph_id.clone(),
            })?;

        if !snapshot.status.is_suspended() {
            warn!(run = %run_id, status = %snapshot.status, "snapshot is not suspended");
        }
        let slot = RunSlot {
            graph: graph.clone(),
            cancel: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(snapshot.restore())),
        };
        let handles = (slot.graph.clone(), slot.state.clone(), slot.cancel.clone());
        self.runs.lock().await.insert(run_id.to_string(), slot);
        Ok(handles)
    }

    /// Registers a graph so snapshots referencing it can resume in a fresh
    /// process.
    pub async fn register_graph(&self, graph: GraphSpec) -> Result<(), RuntimeError> {
        crate::graph::loader::check(&graph)?;
        self.graphs
            .lock()
            .await
            .insert(graph.id.clone(), Arc::new(graph));
        Ok(())
    }

    /// Stops the trace listener. Call once the host is done with the runtime.
    pub async fn shutdown(&self) {
        self.bus.stop().await;
    }
}
