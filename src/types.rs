//! Core vocabulary shared by every module of the runtime.
//!
//! These are the identifiers and classifications that define what a run *is*:
//! which kind of node executed, what state a run is in, and — when a run or
//! node fails — which well-defined failure scope produced the error.
//!
//! # Examples
//!
//! ```rust
//! use goalgraph::types::{NodeType, RunStatus, FailureKind};
//!
//! let kind = NodeType::LlmTools;
//! assert!(kind.uses_llm());
//!
//! let status = RunStatus::Suspended;
//! assert!(!status.is_terminal());
//!
//! let failure = FailureKind::VisitCapExceeded;
//! assert_eq!(failure.to_string(), "visit-cap-exceeded");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one execution instance of a graph.
///
/// Run ids are opaque strings assigned when the scheduler starts from an
/// entry point. They key the snapshot store, the recorder's event stream,
/// and the host-facing `status`/`resume`/`cancel` operations.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        RunId(s.to_string())
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        RunId(s)
    }
}

/// The four executable node variants.
///
/// Each variant has a narrow contract (see the executors module):
/// - `Function`: host-provided pure transformation bound by node id.
/// - `LlmGenerate`: one provider call, outputs parsed from the response.
/// - `LlmTools`: the multi-turn LLM event loop with broker-mediated tools.
/// - `Router`: declarative predicate evaluation producing a routing key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Function,
    LlmGenerate,
    LlmTools,
    Router,
}

impl NodeType {
    /// Returns `true` for node types that call the LLM provider.
    #[must_use]
    pub fn uses_llm(&self) -> bool {
        matches!(self, NodeType::LlmGenerate | NodeType::LlmTools)
    }

    /// Returns `true` for the node type that may invoke broker tools.
    #[must_use]
    pub fn uses_tools(&self) -> bool {
        matches!(self, NodeType::LlmTools)
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Function => write!(f, "function"),
            NodeType::LlmGenerate => write!(f, "llm_generate"),
            NodeType::LlmTools => write!(f, "llm_tools"),
            NodeType::Router => write!(f, "router"),
        }
    }
}

/// Lifecycle state of a run.
///
/// `Running` → `Suspended` (pause node completed) → `Running` (on resume)
/// → `Completed` | `Failed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Suspended,
    Completed,
    Failed { kind: FailureKind },
}

impl RunStatus {
    /// Returns `true` once the run can never be scheduled again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed { .. })
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        matches!(self, RunStatus::Suspended)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Suspended => write!(f, "suspended"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed { kind } => write!(f, "failed({kind})"),
        }
    }
}

/// Classification of every failure the runtime can produce.
///
/// Each kind is produced at exactly one scope:
///
/// | Kind | Scope |
/// |---|---|
/// | `Validation` | graph load |
/// | `MissingInput`, `MissingRequiredOutput` | memory-plane contract |
/// | `VisitCapExceeded`, `DeadEnd` | scheduling |
/// | `LlmError`, `LoopExhausted` | LLM executors |
/// | `ToolError` | tool server (returned to the LLM, never a node failure) |
/// | `ToolTransportLost`, `Timeout` | infrastructure |
/// | `Cancelled` | host |
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Validation,
    MissingInput,
    MissingRequiredOutput,
    VisitCapExceeded,
    DeadEnd,
    LlmError,
    LoopExhausted,
    ToolError,
    ToolTransportLost,
    Timeout,
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Validation => "validation",
            FailureKind::MissingInput => "missing-input",
            FailureKind::MissingRequiredOutput => "missing-required-output",
            FailureKind::VisitCapExceeded => "visit-cap-exceeded",
            FailureKind::DeadEnd => "dead-end",
            FailureKind::LlmError => "llm-error",
            FailureKind::LoopExhausted => "loop-exhausted",
            FailureKind::ToolError => "tool-error",
            FailureKind::ToolTransportLost => "tool-transport-lost",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Severity attached to problem events in the decision trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}
