use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::provider::TokenUsage;
use crate::types::{RunId, Severity};

/// One entry in a run's trace, stamped with sequence and time.
///
/// Events within a run are totally ordered by `seq`; across runs only per-run
/// order is guaranteed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub run_id: RunId,
    pub seq: u64,
    pub when: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: RunEventKind,
}

/// The event vocabulary of the decision trace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEventKind {
    RunStarted {
        goal_id: Option<String>,
        goal_name: Option<String>,
        input: BTreeMap<String, Value>,
    },
    Decision(Decision),
    Outcome(Outcome),
    Problem(Problem),
    RunEnded {
        success: bool,
        narrative: String,
        outputs: BTreeMap<String, Value>,
        metrics: RunMetrics,
    },
}

/// A candidate path the scheduler weighed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionOption {
    pub id: String,
    pub description: String,
    /// Option category, e.g. an edge condition name.
    pub kind: String,
    #[serde(default)]
    pub pros: Vec<String>,
    #[serde(default)]
    pub cons: Vec<String>,
}

impl DecisionOption {
    #[must_use]
    pub fn new(id: &str, description: &str, kind: &str) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            kind: kind.to_string(),
            pros: Vec::new(),
            cons: Vec::new(),
        }
    }
}

/// Emitted at the moment a node commits to a path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: String,
    pub node_id: String,
    pub intent: String,
    pub options: Vec<DecisionOption>,
    pub chosen: String,
    pub reasoning: String,
}

/// Emitted after the decided-upon node executed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub decision_id: String,
    pub success: bool,
    pub result: Value,
    pub summary: String,
    pub latency_ms: u64,
    pub tokens: TokenUsage,
}

/// A flagged anomaly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub severity: Severity,
    pub node_id: Option<String>,
    pub message: String,
    pub remedy: Option<String>,
}

/// Aggregate execution metrics reported in the run-ended event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub steps_executed: u64,
    pub total_tokens: TokenUsage,
    pub total_latency_ms: u64,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            RunEventKind::RunStarted { goal_name, .. } => {
                write!(
                    f,
                    "[{}#{}] run started{}",
                    self.run_id,
                    self.seq,
                    goal_name
                        .as_deref()
                        .map(|g| format!(" goal={g}"))
                        .unwrap_or_default()
                )
            }
            RunEventKind::Decision(d) => write!(
                f,
                "[{}#{}] decision {} at {}: {} -> {}",
                self.run_id, self.seq, d.id, d.node_id, d.intent, d.chosen
            ),
            RunEventKind::Outcome(o) => write!(
                f,
                "[{}#{}] outcome of {}: success={} latency={}ms tokens={}",
                self.run_id,
                self.seq,
                o.decision_id,
                o.success,
                o.latency_ms,
                o.tokens.total()
            ),
            RunEventKind::Problem(p) => write!(
                f,
                "[{}#{}] problem [{}]{}: {}",
                self.run_id,
                self.seq,
                p.severity,
                p.node_id
                    .as_deref()
                    .map(|n| format!(" at {n}"))
                    .unwrap_or_default(),
                p.message
            ),
            RunEventKind::RunEnded {
                success, narrative, ..
            } => write!(
                f,
                "[{}#{}] run ended success={success}: {narrative}",
                self.run_id, self.seq
            ),
        }
    }
}
