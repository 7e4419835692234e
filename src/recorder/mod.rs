//! The decision recorder: an append-only, per-run trace of what the executor
//! decided, what happened, and what went wrong.
//!
//! Architecture mirrors a fan-out bus: producers push [`TraceEvent`]s onto a
//! `flume` channel, a background listener broadcasts each event to every
//! registered [`RecorderSink`]. Events are monotonically sequenced per run;
//! downstream analysis (pattern mining, failure root-causing) consumes the
//! stream without the executor's participation.
//!
//! The [`Recorder`] handed to a scheduler is a per-run handle — no globals.

mod event;
mod sink;

pub use event::{
    Decision, DecisionOption, Outcome, Problem, RunEventKind, RunMetrics, TraceEvent,
};
pub use sink::{ChannelSink, MemorySink, RecorderSink, StdOutSink};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task;

use crate::graph::goal::Goal;
use crate::provider::TokenUsage;
use crate::types::{RunId, Severity};
use crate::utils::id;

/// Owns the sinks and the listener task; hands out per-run [`Recorder`]s.
pub struct TraceBus {
    sinks: Arc<Mutex<Vec<Box<dyn RecorderSink>>>>,
    channel: (flume::Sender<TraceEvent>, flume::Receiver<TraceEvent>),
    listener: Mutex<Option<ListenerState>>,
}

struct ListenerState {
    shutdown_tx: oneshot::Sender<()>,
    handle: task::JoinHandle<()>,
}

impl Default for TraceBus {
    fn default() -> Self {
        Self::with_sinks(vec![Box::new(StdOutSink::default())])
    }
}

impl TraceBus {
    #[must_use]
    pub fn with_sinks(sinks: Vec<Box<dyn RecorderSink>>) -> Self {
        Self {
            sinks: Arc::new(Mutex::new(sinks)),
            channel: flume::unbounded(),
            listener: Mutex::new(None),
        }
    }

    /// Adds a sink after construction (per-request streaming).
    pub fn add_sink<S: RecorderSink + 'static>(&self, sink: S) {
        self.sinks.lock().unwrap().push(Box::new(sink));
    }

    /// Creates the per-run recorder handle.
    #[must_use]
    pub fn recorder_for(&self, run_id: RunId) -> Recorder {
        Recorder {
            run_id,
            tx: self.channel.0.clone(),
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Spawns the background broadcast task. Idempotent.
    pub fn listen(&self) {
        let mut guard = self.listener.lock().expect("listener poisoned");
        if guard.is_some() {
            return;
        }

        let receiver = self.channel.1.clone();
        let sinks = self.sinks.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = task::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    recv = receiver.recv_async() => match recv {
                        Err(_) => break,
                        Ok(event) => {
                            let mut sinks_guard = sinks.lock().unwrap();
                            for sink in sinks_guard.iter_mut() {
                                if let Err(e) = sink.handle(&event) {
                                    tracing::warn!(error = %e, "recorder sink error");
                                }
                            }
                        }
                    }
                }
            }
        });

        *guard = Some(ListenerState {
            shutdown_tx,
            handle,
        });
    }

    /// Stops the background listener, draining nothing further.
    pub async fn stop(&self) {
        let state = {
            let mut guard = self.listener.lock().expect("listener poisoned");
            guard.take()
        };
        if let Some(state) = state {
            let _ = state.shutdown_tx.send(());
            let _ = state.handle.await;
        }
    }
}

impl Drop for TraceBus {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.listener.lock() {
            if let Some(state) = guard.take() {
                let _ = state.shutdown_tx.send(());
                state.handle.abort();
            }
        }
    }
}

/// Per-run append-only event producer.
///
/// Every method stamps the event with the run id, a monotonic sequence
/// number, and the emission time. Emission never blocks the scheduler; a
/// closed channel is logged and dropped.
#[derive(Clone)]
pub struct Recorder {
    run_id: RunId,
    tx: flume::Sender<TraceEvent>,
    seq: Arc<AtomicU64>,
}

impl Recorder {
    #[must_use]
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    fn emit(&self, kind: RunEventKind) {
        let event = TraceEvent {
            run_id: self.run_id.clone(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst),
            when: Utc::now(),
            kind,
        };
        if self.tx.send(event).is_err() {
            tracing::debug!(run = %self.run_id, "trace bus closed; dropping event");
        }
    }

    /// Emits the run-started event.
    pub fn run_started(&self, goal: Option<&Goal>, input: &FxHashMap<String, Value>) {
        self.emit(RunEventKind::RunStarted {
            goal_id: goal.map(|g| g.id.clone()),
            goal_name: goal.map(|g| g.name.clone()),
            input: input
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        });
    }

    /// Emits a decision at the moment a node commits to a path.
    ///
    /// Returns the decision id for the matching outcome.
    pub fn decision(
        &self,
        node_id: &str,
        intent: &str,
        options: Vec<DecisionOption>,
        chosen: &str,
        reasoning: &str,
    ) -> String {
        let decision_id = id::decision_id();
        self.emit(RunEventKind::Decision(Decision {
            id: decision_id.clone(),
            node_id: node_id.to_string(),
            intent: intent.to_string(),
            options,
            chosen: chosen.to_string(),
            reasoning: reasoning.to_string(),
        }));
        decision_id
    }

    /// Emits the outcome of a previously recorded decision.
    pub fn outcome(
        &self,
        decision_id: &str,
        success: bool,
        result: Value,
        summary: &str,
        latency_ms: u64,
        tokens: TokenUsage,
    ) {
        self.emit(RunEventKind::Outcome(Outcome {
            decision_id: decision_id.to_string(),
            success,
            result,
            summary: summary.to_string(),
            latency_ms,
            tokens,
        }));
    }

    /// Flags an anomaly for later analysis.
    pub fn problem(
        &self,
        severity: Severity,
        node_id: Option<&str>,
        message: &str,
        remedy: Option<&str>,
    ) {
        self.emit(RunEventKind::Problem(Problem {
            severity,
            node_id: node_id.map(str::to_string),
            message: message.to_string(),
            remedy: remedy.map(str::to_string),
        }));
    }

    /// Emits the run-ended event with the final narrative and metrics.
    pub fn run_ended(
        &self,
        success: bool,
        narrative: &str,
        outputs: &FxHashMap<String, Value>,
        metrics: RunMetrics,
    ) {
        self.emit(RunEventKind::RunEnded {
            success,
            narrative: narrative.to_string(),
            outputs: outputs
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            metrics,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn events_are_sequenced_and_delivered() {
        let memory_sink = MemorySink::new();
        let bus = TraceBus::with_sinks(vec![Box::new(memory_sink.clone())]);
        bus.listen();

        let recorder = bus.recorder_for(RunId::from("run-1"));
        recorder.run_started(None, &FxHashMap::default());
        let did = recorder.decision("a", "advance", vec![], "e1", "on-success fired");
        recorder.outcome(&did, true, json!({"y": 2}), "ok", 3, TokenUsage::default());
        recorder.problem(Severity::Warning, Some("a"), "slow", None);
        recorder.run_ended(true, "done", &FxHashMap::default(), RunMetrics::default());

        // Drain the listener before asserting.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        bus.stop().await;

        let events = memory_sink.snapshot();
        assert_eq!(events.len(), 5);
        let seqs: Vec<u64> = events.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        assert!(matches!(events[0].kind, RunEventKind::RunStarted { .. }));
        assert!(matches!(events[4].kind, RunEventKind::RunEnded { .. }));
    }

    #[tokio::test]
    async fn listen_is_idempotent() {
        let bus = TraceBus::with_sinks(vec![]);
        bus.listen();
        bus.listen();
        bus.stop().await;
    }

    #[test]
    fn decision_ids_are_returned() {
        let bus = TraceBus::with_sinks(vec![]);
        let recorder = bus.recorder_for(RunId::from("run-2"));
        let a = recorder.decision("n", "i", vec![], "e", "r");
        let b = recorder.decision("n", "i", vec![], "e", "r");
        assert_ne!(a, b);
    }
}
