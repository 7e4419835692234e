//! Graph description: nodes, edges, entry points, pause and terminal sets.
//!
//! A [`GraphSpec`] is the immutable, persistable description the executor
//! runs. Node configuration is fully enumerated — input/output keys, nullable
//! outputs, tool set, system prompt, client-facing flag, visit cap — there is
//! no open-ended parameter bag. The builder methods exist for tests and host
//! programs that assemble graphs in code; authored graphs normally arrive via
//! [`crate::graph::loader`].
//!
//! # Examples
//!
//! ```
//! use goalgraph::graph::spec::{EdgeCondition, EdgeSpec, GraphSpec, NodeSpec};
//! use goalgraph::types::NodeType;
//!
//! let graph = GraphSpec::new("demo", "1")
//!     .with_node(NodeSpec::function("a", "A").with_outputs(["y"]))
//!     .with_node(NodeSpec::function("b", "B").with_inputs(["y"]).with_outputs(["out"]))
//!     .with_edge(EdgeSpec::new("e1", "a", "b", EdgeCondition::OnSuccess, 1))
//!     .with_entry_point("start", "a")
//!     .with_terminal_node("b");
//! assert_eq!(graph.node("a").unwrap().node_type, NodeType::Function);
//! ```

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::BTreeSet;

use crate::graph::goal::Goal;
use crate::types::NodeType;

/// The default entry point name used by `run` when the caller names none.
pub const DEFAULT_ENTRY_POINT: &str = "start";

/// The conventional memory key resume input is injected under.
pub const RESUME_INPUT_KEY: &str = "input";

/// Condition under which an edge is considered for traversal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCondition {
    /// Fires when the source node succeeded.
    OnSuccess,
    /// Fires when the source node failed (including dead-end at a visit cap).
    OnFailure,
    /// Fires on either outcome.
    Always,
    /// Fires when the attached predicate holds against post-merge memory.
    Conditional,
}

/// A directed edge between two nodes.
///
/// Positive priority marks a forward edge; negative priority marks a feedback
/// edge looping back to an earlier node. Among candidates of one evaluation,
/// higher priority wins and ties break on edge id, lexicographically.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EdgeSpec {
    pub id: String,
    pub source: String,
    pub target: String,
    pub condition: EdgeCondition,
    /// Predicate expression, required iff `condition` is `Conditional`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
    pub priority: i32,
}

impl EdgeSpec {
    #[must_use]
    pub fn new(
        id: &str,
        source: &str,
        target: &str,
        condition: EdgeCondition,
        priority: i32,
    ) -> Self {
        Self {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            condition,
            predicate: None,
            priority,
        }
    }

    /// Builds a conditional edge with its predicate expression.
    #[must_use]
    pub fn conditional(id: &str, source: &str, target: &str, predicate: &str, priority: i32) -> Self {
        Self {
            id: id.to_string(),
            source: source.to_string(),
            target: target.to_string(),
            condition: EdgeCondition::Conditional,
            predicate: Some(predicate.to_string()),
            priority,
        }
    }

    /// Forward edges carry positive priority; feedback edges negative.
    #[must_use]
    pub fn is_feedback(&self) -> bool {
        self.priority < 0
    }
}

/// One rule of a router node: when `when` holds, emit `emit` as routing key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteRule {
    /// Predicate over the node's input view.
    pub when: String,
    /// Value written to the router's output key when the predicate fires.
    pub emit: String,
}

/// Fully enumerated configuration of one node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub name: String,
    pub node_type: NodeType,
    /// Keys consumed from the memory plane.
    #[serde(default)]
    pub input_keys: Vec<String>,
    /// Keys produced into the memory plane.
    #[serde(default)]
    pub output_keys: Vec<String>,
    /// Outputs permitted to remain unset on successful completion.
    #[serde(default)]
    pub nullable_output_keys: Vec<String>,
    /// Tool names this node may call (llm-tools only).
    #[serde(default)]
    pub tools: Vec<String>,
    /// System prompt template, `{name}` placeholders resolved from the input view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// The node streams to the human and blocks for input between turns.
    #[serde(default)]
    pub client_facing: bool,
    /// Per-run execution cap. `0` means unlimited.
    #[serde(default = "default_max_visits")]
    pub max_visits: u32,
    /// Intra-visit retry budget on failure.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Routing rules (router nodes only), evaluated in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub route_rules: Vec<RouteRule>,
    /// Routing key emitted when no rule matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_default: Option<String>,
}

fn default_max_visits() -> u32 {
    1
}

fn default_max_attempts() -> u32 {
    1
}

impl NodeSpec {
    fn base(id: &str, name: &str, node_type: NodeType) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            node_type,
            input_keys: Vec::new(),
            output_keys: Vec::new(),
            nullable_output_keys: Vec::new(),
            tools: Vec::new(),
            system_prompt: None,
            client_facing: false,
            max_visits: default_max_visits(),
            max_attempts: default_max_attempts(),
            route_rules: Vec::new(),
            route_default: None,
        }
    }

    #[must_use]
    pub fn function(id: &str, name: &str) -> Self {
        Self::base(id, name, NodeType::Function)
    }

    #[must_use]
    pub fn llm_generate(id: &str, name: &str, system_prompt: &str) -> Self {
        let mut spec = Self::base(id, name, NodeType::LlmGenerate);
        spec.system_prompt = Some(system_prompt.to_string());
        spec
    }

    #[must_use]
    pub fn llm_tools(id: &str, name: &str, system_prompt: &str) -> Self {
        let mut spec = Self::base(id, name, NodeType::LlmTools);
        spec.system_prompt = Some(system_prompt.to_string());
        spec
    }

    #[must_use]
    pub fn router(id: &str, name: &str) -> Self {
        Self::base(id, name, NodeType::Router)
    }

    #[must_use]
    pub fn with_inputs<I: IntoIterator<Item = impl Into<String>>>(mut self, keys: I) -> Self {
        self.input_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_outputs<I: IntoIterator<Item = impl Into<String>>>(mut self, keys: I) -> Self {
        self.output_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_nullable_outputs<I: IntoIterator<Item = impl Into<String>>>(
        mut self,
        keys: I,
    ) -> Self {
        self.nullable_output_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_tools<I: IntoIterator<Item = impl Into<String>>>(mut self, tools: I) -> Self {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_max_visits(mut self, max_visits: u32) -> Self {
        self.max_visits = max_visits;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn client_facing(mut self) -> Self {
        self.client_facing = true;
        self
    }

    #[must_use]
    pub fn with_route_rule(mut self, when: &str, emit: &str) -> Self {
        self.route_rules.push(RouteRule {
            when: when.to_string(),
            emit: emit.to_string(),
        });
        self
    }

    #[must_use]
    pub fn with_route_default(mut self, emit: &str) -> Self {
        self.route_default = Some(emit.to_string());
        self
    }

    /// Returns `true` when the output key may legitimately remain unset.
    #[must_use]
    pub fn is_nullable_output(&self, key: &str) -> bool {
        self.nullable_output_keys.iter().any(|k| k == key)
    }

    /// Output keys that must be present after a successful execution.
    pub fn required_outputs(&self) -> impl Iterator<Item = &String> {
        self.output_keys
            .iter()
            .filter(|k| !self.is_nullable_output(k))
    }

    /// Input keys that must be present before the node is scheduled.
    ///
    /// A key listed in `nullable_output_keys` of this node is permitted to be
    /// absent on input as well (the node tolerates its absence by contract).
    pub fn required_inputs(&self) -> impl Iterator<Item = &String> {
        self.input_keys
            .iter()
            .filter(|k| !self.is_nullable_output(k))
    }
}

/// Graph-level wiring: entry points, pause nodes, terminal nodes.
///
/// `BTreeMap`/`BTreeSet` keep the persisted form stable across dumps.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Symbolic name → node id. Resume entry points follow the
    /// `<pause-node-id>_resume` convention.
    #[serde(default)]
    pub entry_points: BTreeMap<String, String>,
    /// Nodes whose successful completion suspends the run.
    #[serde(default)]
    pub pause_nodes: BTreeSet<String>,
    /// Nodes whose execution completes the run.
    #[serde(default)]
    pub terminal_nodes: BTreeSet<String>,
}

/// The immutable description of a graph: header, goal, nodes, edges, config.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphSpec {
    pub id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<Goal>,
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<EdgeSpec>,
    #[serde(default)]
    pub config: GraphConfig,
}

impl GraphSpec {
    #[must_use]
    pub fn new(id: &str, version: &str) -> Self {
        Self {
            id: id.to_string(),
            version: version.to_string(),
            goal: None,
            nodes: Vec::new(),
            edges: Vec::new(),
            config: GraphConfig::default(),
        }
    }

    #[must_use]
    pub fn with_goal(mut self, goal: Goal) -> Self {
        self.goal = Some(goal);
        self
    }

    #[must_use]
    pub fn with_node(mut self, node: NodeSpec) -> Self {
        self.nodes.push(node);
        self
    }

    #[must_use]
    pub fn with_edge(mut self, edge: EdgeSpec) -> Self {
        self.edges.push(edge);
        self
    }

    #[must_use]
    pub fn with_entry_point(mut self, name: &str, node_id: &str) -> Self {
        self.config
            .entry_points
            .insert(name.to_string(), node_id.to_string());
        self
    }

    #[must_use]
    pub fn with_pause_node(mut self, node_id: &str) -> Self {
        self.config.pause_nodes.insert(node_id.to_string());
        self
    }

    #[must_use]
    pub fn with_terminal_node(mut self, node_id: &str) -> Self {
        self.config.terminal_nodes.insert(node_id.to_string());
        self
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Looks up the node id an entry point maps to.
    #[must_use]
    pub fn entry_point(&self, name: &str) -> Option<&str> {
        self.config.entry_points.get(name).map(String::as_str)
    }

    /// The conventional resume entry point name for a pause node.
    #[must_use]
    pub fn resume_entry_name(pause_node_id: &str) -> String {
        format!("{pause_node_id}_resume")
    }

    /// Outgoing edges of a node, in declaration order.
    #[must_use]
    pub fn outgoing_edges(&self, node_id: &str) -> Vec<&EdgeSpec> {
        self.edges.iter().filter(|e| e.source == node_id).collect()
    }

    #[must_use]
    pub fn is_pause_node(&self, node_id: &str) -> bool {
        self.config.pause_nodes.contains(node_id)
    }

    #[must_use]
    pub fn is_terminal_node(&self, node_id: &str) -> bool {
        self.config.terminal_nodes.contains(node_id)
    }

    /// Adjacency over forward edges only, used by reachability analysis.
    #[must_use]
    pub fn forward_adjacency(&self) -> FxHashMap<&str, Vec<&str>> {
        let mut adj: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
        for edge in self.edges.iter().filter(|e| !e.is_feedback()) {
            adj.entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
        }
        adj
    }
}
