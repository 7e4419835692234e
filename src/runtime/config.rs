//! Runtime configuration: deadlines, loop caps, snapshot location.

use std::path::PathBuf;
use std::time::Duration;

use crate::executors::LoopLimits;

/// Policy knobs supplied by the host.
///
/// Deadlines exist at three scopes — per tool call, per LLM turn, per run —
/// and expiry converts to a timeout failure at the innermost scope.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Root directory for per-run snapshot directories.
    pub snapshot_dir: PathBuf,
    pub tool_call_timeout: Duration,
    pub llm_turn_timeout: Duration,
    pub run_deadline: Duration,
    /// Turn cap of the llm-tools event loop.
    pub max_loop_turns: u32,
    /// Token cap of the llm-tools event loop.
    pub max_loop_tokens: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            snapshot_dir: Self::resolve_snapshot_dir(None),
            tool_call_timeout: Duration::from_secs(30),
            llm_turn_timeout: Duration::from_secs(120),
            run_deadline: Duration::from_secs(600),
            max_loop_turns: 16,
            max_loop_tokens: 200_000,
        }
    }
}

impl RuntimeConfig {
    /// Environment override for the snapshot root.
    pub const SNAPSHOT_DIR_VAR: &'static str = "GOALGRAPH_SNAPSHOT_DIR";

    fn resolve_snapshot_dir(provided: Option<PathBuf>) -> PathBuf {
        if let Some(dir) = provided {
            return dir;
        }
        dotenvy::dotenv().ok();
        std::env::var(Self::SNAPSHOT_DIR_VAR)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("goalgraph_runs"))
    }

    #[must_use]
    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = dir.into();
        self
    }

    #[must_use]
    pub fn with_tool_call_timeout(mut self, timeout: Duration) -> Self {
        self.tool_call_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_llm_turn_timeout(mut self, timeout: Duration) -> Self {
        self.llm_turn_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_run_deadline(mut self, deadline: Duration) -> Self {
        self.run_deadline = deadline;
        self
    }

    #[must_use]
    pub fn with_loop_caps(mut self, max_turns: u32, max_tokens: u64) -> Self {
        self.max_loop_turns = max_turns;
        self.max_loop_tokens = max_tokens;
        self
    }

    /// The per-call limits handed to LLM executors.
    #[must_use]
    pub fn loop_limits(&self) -> LoopLimits {
        LoopLimits {
            llm_turn_timeout: self.llm_turn_timeout,
            max_turns: self.max_loop_turns,
            max_loop_tokens: self.max_loop_tokens,
        }
    }
}
