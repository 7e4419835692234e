//! Function executor: host-provided pure transformations keyed by node id.
//!
//! Function nodes carry no behavior in the graph document — the host binds an
//! implementation to each function node id before starting a run. The binding
//! receives the node's scoped input view and returns a mapping covering the
//! declared output keys.

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

use super::{ExecutorContext, ExecutorError, ExecutorReport};
use crate::memory::{MemorySnapshot, StagedOutputs};
use crate::provider::TokenUsage;

/// Error raised by a host-provided function binding.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct FunctionError {
    pub message: String,
}

impl FunctionError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<String> for FunctionError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for FunctionError {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// A host-provided transformation bound to a function node.
#[async_trait]
pub trait FunctionNode: Send + Sync {
    async fn call(&self, view: MemorySnapshot) -> Result<StagedOutputs, FunctionError>;
}

/// Adapter so plain closures can serve as bindings.
struct ClosureNode<F>(F);

#[async_trait]
impl<F> FunctionNode for ClosureNode<F>
where
    F: Fn(MemorySnapshot) -> Result<StagedOutputs, FunctionError> + Send + Sync,
{
    async fn call(&self, view: MemorySnapshot) -> Result<StagedOutputs, FunctionError> {
        (self.0)(view)
    }
}

/// Registry of function bindings, keyed by node id.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    bindings: FxHashMap<String, Arc<dyn FunctionNode>>,
}

impl FunctionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a trait implementation to a node id.
    pub fn register(&mut self, node_id: &str, node: impl FunctionNode + 'static) {
        self.bindings.insert(node_id.to_string(), Arc::new(node));
    }

    /// Binds a synchronous closure to a node id.
    pub fn register_fn<F>(&mut self, node_id: &str, f: F)
    where
        F: Fn(MemorySnapshot) -> Result<StagedOutputs, FunctionError> + Send + Sync + 'static,
    {
        self.bindings
            .insert(node_id.to_string(), Arc::new(ClosureNode(f)));
    }

    #[must_use]
    pub fn get(&self, node_id: &str) -> Option<Arc<dyn FunctionNode>> {
        self.bindings.get(node_id).cloned()
    }

    #[must_use]
    pub fn has(&self, node_id: &str) -> bool {
        self.bindings.contains_key(node_id)
    }
}

pub(super) async fn execute(ctx: ExecutorContext<'_>) -> ExecutorReport {
    let node_id = ctx.node.id.clone();
    let Some(binding) = ctx.functions.get(&node_id) else {
        return ExecutorReport::failure(
            ExecutorError::MissingBinding { node: node_id },
            TokenUsage::default(),
        );
    };

    debug!(node = %node_id, "invoking function binding");
    match binding.call(ctx.view).await {
        Ok(staged) => ExecutorReport::success(staged, TokenUsage::default()),
        Err(e) => ExecutorReport::failure(
            ExecutorError::Function {
                node: node_id,
                message: e.message,
            },
            TokenUsage::default(),
        ),
    }
}
