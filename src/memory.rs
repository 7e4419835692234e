//! The per-run memory plane.
//!
//! A run owns exactly one memory plane: a keyed store of JSON values passed
//! between nodes. Nodes never touch the plane directly — they receive a
//! snapshot view scoped to their declared input keys, stage their outputs,
//! and the scheduler applies the staged writes atomically at commit. A node
//! that fails applies no writes.
//!
//! # Contracts
//!
//! - Before a node executes, every non-nullable declared input key must be
//!   present ([`MemoryPlane::verify_inputs`]); the scheduler enforces this.
//! - After a node succeeds, every non-nullable declared output key must be
//!   present in its staged writes ([`MemoryPlane::merge`]).
//! - Feedback revisits overwrite: last write wins, stale downstream values
//!   stay readable.
//!
//! # Examples
//!
//! ```
//! use goalgraph::graph::spec::NodeSpec;
//! use goalgraph::memory::{MemoryPlane, StagedOutputs};
//! use serde_json::json;
//!
//! let node = NodeSpec::function("calc", "Calc")
//!     .with_inputs(["x"])
//!     .with_outputs(["y"]);
//!
//! let mut memory = MemoryPlane::new();
//! memory.write("x", json!(1));
//! memory.verify_inputs(&node).unwrap();
//!
//! let mut staged = StagedOutputs::default();
//! staged.insert("y".to_string(), json!(2));
//! memory.merge(&node, staged).unwrap();
//! assert_eq!(memory.read("y"), Some(&json!(2)));
//! ```

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Writes staged by a node during execution, applied atomically at commit.
pub type StagedOutputs = FxHashMap<String, Value>;

/// A point-in-time copy of memory contents handed to nodes and predicates.
pub type MemorySnapshot = FxHashMap<String, Value>;

#[derive(Debug, Error, Diagnostic)]
pub enum MemoryError {
    /// A non-nullable declared input key was absent at schedule time.
    #[error("node {node}: required input key missing from memory plane: {key}")]
    #[diagnostic(
        code(goalgraph::memory::missing_input),
        help("Check that a predecessor produces the key or that the initial payload carries it.")
    )]
    MissingInput { node: String, key: String },

    /// A non-nullable declared output key was absent after success.
    #[error("node {node}: required output key missing from staged writes: {key}")]
    #[diagnostic(
        code(goalgraph::memory::missing_required_output),
        help("The node must produce the key or declare it nullable.")
    )]
    MissingRequiredOutput { node: String, key: String },
}

/// The run-scoped keyed store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryPlane {
    values: FxHashMap<String, Value>,
}

impl MemoryPlane {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a plane from an initial input payload, one key per entry.
    #[must_use]
    pub fn from_payload(payload: &FxHashMap<String, Value>) -> Self {
        Self {
            values: payload.clone(),
        }
    }

    /// Unconditional overwrite.
    pub fn write(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    /// Reads a single key; absent keys return `None`.
    #[must_use]
    pub fn read(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copies the full contents; the snapshot is independent of later writes.
    #[must_use]
    pub fn snapshot(&self) -> MemorySnapshot {
        self.values.clone()
    }

    /// The scoped view a node reads: its declared input keys only.
    ///
    /// Keys that are declared but absent are simply missing from the view
    /// (the scheduler has already verified the required ones exist).
    #[must_use]
    pub fn input_view(&self, node: &crate::graph::spec::NodeSpec) -> MemorySnapshot {
        let mut view = MemorySnapshot::default();
        for key in &node.input_keys {
            if let Some(value) = self.values.get(key) {
                view.insert(key.clone(), value.clone());
            }
        }
        view
    }

    /// Verifies the schedule-time input precondition for a node.
    pub fn verify_inputs(&self, node: &crate::graph::spec::NodeSpec) -> Result<(), MemoryError> {
        for key in node.required_inputs() {
            if !self.values.contains_key(key) {
                return Err(MemoryError::MissingInput {
                    node: node.id.clone(),
                    key: key.clone(),
                });
            }
        }
        Ok(())
    }

    /// Applies a node's staged writes atomically.
    ///
    /// Fails without writing anything when a non-nullable declared output is
    /// absent. Staged keys the node never declared are dropped with a
    /// warning. Returns the keys actually written.
    pub fn merge(
        &mut self,
        node: &crate::graph::spec::NodeSpec,
        staged: StagedOutputs,
    ) -> Result<Vec<String>, MemoryError> {
        for key in node.required_outputs() {
            if !staged.contains_key(key) {
                return Err(MemoryError::MissingRequiredOutput {
                    node: node.id.clone(),
                    key: key.clone(),
                });
            }
        }

        let mut written = Vec::with_capacity(staged.len());
        for (key, value) in staged {
            if node.output_keys.iter().any(|k| *k == key) {
                self.values.insert(key.clone(), value);
                written.push(key);
            } else {
                tracing::warn!(node = %node.id, key = %key, "dropping undeclared staged output");
            }
        }
        Ok(written)
    }
}
