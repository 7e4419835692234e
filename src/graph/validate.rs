//! Structural validation of graph descriptions.
//!
//! All checks are fatal at load: a graph that fails any of them is rejected
//! before a run can be created. The checks cover referential integrity (edge
//! endpoints, entry points, pause/terminal sets), memory-plane coverage of
//! declared inputs, entry-node topology, predicate well-formedness, and the
//! authoring error of ambiguous forward fan-out.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::graph::predicate::Predicate;
use crate::graph::spec::{EdgeCondition, GraphSpec};
use crate::types::NodeType;

/// One violated invariant, with enough context to fix the document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationIssue {
    pub message: String,
}

impl ValidationIssue {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Runs every structural check and collects all violations.
///
/// Returns an empty vector for a valid graph. Callers treat any non-empty
/// result as fatal.
#[must_use]
pub fn validate(graph: &GraphSpec) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let node_ids: FxHashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();

    // Duplicate node ids make every other check ambiguous.
    {
        let mut seen = FxHashSet::default();
        for node in &graph.nodes {
            if !seen.insert(node.id.as_str()) {
                issues.push(ValidationIssue::new(format!(
                    "duplicate node id: {}",
                    node.id
                )));
            }
        }
    }

    // Every edge endpoint resolves to a defined node.
    for edge in &graph.edges {
        if !node_ids.contains(edge.source.as_str()) {
            issues.push(ValidationIssue::new(format!(
                "edge {} references unknown source node: {}",
                edge.id, edge.source
            )));
        }
        if !node_ids.contains(edge.target.as_str()) {
            issues.push(ValidationIssue::new(format!(
                "edge {} references unknown target node: {}",
                edge.id, edge.target
            )));
        }
    }

    // At least one entry point, each mapping to an existing node.
    if graph.config.entry_points.is_empty() {
        issues.push(ValidationIssue::new("graph declares no entry points"));
    }
    for (name, node_id) in &graph.config.entry_points {
        if !node_ids.contains(node_id.as_str()) {
            issues.push(ValidationIssue::new(format!(
                "entry point {name} maps to unknown node: {node_id}"
            )));
        }
    }

    // Pause and terminal sets are defined and disjoint.
    for id in &graph.config.pause_nodes {
        if !node_ids.contains(id.as_str()) {
            issues.push(ValidationIssue::new(format!(
                "pause set references unknown node: {id}"
            )));
        }
        if graph.config.terminal_nodes.contains(id) {
            issues.push(ValidationIssue::new(format!(
                "node {id} is declared both pause and terminal"
            )));
        }
    }
    for id in &graph.config.terminal_nodes {
        if !node_ids.contains(id.as_str()) {
            issues.push(ValidationIssue::new(format!(
                "terminal set references unknown node: {id}"
            )));
        }
    }

    // Entry nodes may receive feedback but not forward edges from other nodes.
    let entry_nodes: FxHashSet<&str> = graph
        .config
        .entry_points
        .values()
        .map(String::as_str)
        .collect();
    for edge in &graph.edges {
        if edge.priority > 0
            && entry_nodes.contains(edge.target.as_str())
            && edge.source != edge.target
        {
            issues.push(ValidationIssue::new(format!(
                "entry node {} has incoming forward edge {} from {}",
                edge.target, edge.id, edge.source
            )));
        }
    }

    // Conditional edges carry a parseable, known-name predicate.
    let known_keys: FxHashSet<&str> = graph
        .nodes
        .iter()
        .flat_map(|n| n.output_keys.iter().chain(n.input_keys.iter()))
        .map(String::as_str)
        .collect();
    for edge in &graph.edges {
        match (&edge.condition, &edge.predicate) {
            (EdgeCondition::Conditional, None) => {
                issues.push(ValidationIssue::new(format!(
                    "conditional edge {} carries no predicate",
                    edge.id
                )));
            }
            (EdgeCondition::Conditional, Some(text)) if text.trim().is_empty() => {
                issues.push(ValidationIssue::new(format!(
                    "conditional edge {} carries an empty predicate",
                    edge.id
                )));
            }
            (EdgeCondition::Conditional, Some(text)) => match Predicate::parse(text) {
                Ok(p) => {
                    for name in p.referenced_names() {
                        if !known_keys.contains(name.as_str()) {
                            issues.push(ValidationIssue::new(format!(
                                "edge {} predicate references name absent from the memory plane: {name}",
                                edge.id
                            )));
                        }
                    }
                }
                Err(e) => {
                    issues.push(ValidationIssue::new(format!(
                        "edge {} predicate does not parse: {e}",
                        edge.id
                    )));
                }
            },
            _ => {}
        }
    }

    // Router rules are predicates too, held to the same bar.
    for node in &graph.nodes {
        if node.node_type == NodeType::Router {
            if node.output_keys.len() != 1 {
                issues.push(ValidationIssue::new(format!(
                    "router node {} must declare exactly one output key",
                    node.id
                )));
            }
            for (idx, rule) in node.route_rules.iter().enumerate() {
                if let Err(e) = Predicate::parse(&rule.when) {
                    issues.push(ValidationIssue::new(format!(
                        "router node {} rule {idx} does not parse: {e}",
                        node.id
                    )));
                }
            }
        }
    }

    // Input coverage: every declared input is produced by a forward ancestor,
    // nullable on the node, or expected from the initial payload (an input of
    // an entry node).
    let ancestors = forward_ancestors(graph);
    let payload_keys: FxHashSet<&str> = graph
        .nodes
        .iter()
        .filter(|n| entry_nodes.contains(n.id.as_str()))
        .flat_map(|n| n.input_keys.iter())
        .map(String::as_str)
        .collect();
    for node in &graph.nodes {
        let produced: FxHashSet<&str> = ancestors
            .get(node.id.as_str())
            .map(|set| {
                set.iter()
                    .filter_map(|id| graph.node(id))
                    .flat_map(|n| n.output_keys.iter())
                    .map(String::as_str)
                    .collect()
            })
            .unwrap_or_default();
        for key in &node.input_keys {
            let covered = produced.contains(key.as_str())
                || node.is_nullable_output(key)
                || payload_keys.contains(key.as_str());
            if !covered {
                issues.push(ValidationIssue::new(format!(
                    "node {} input key {key} is not produced by any reachable predecessor, \
                     not nullable, and not part of the initial payload",
                    node.id
                )));
            }
        }
    }

    // Ambiguous forward fan-out: two forward edges from one source sharing the
    // top priority and the same condition can fire together; the sequential
    // core treats that as an authoring error.
    let mut by_source: FxHashMap<&str, Vec<&crate::graph::spec::EdgeSpec>> = FxHashMap::default();
    for edge in graph.edges.iter().filter(|e| e.priority > 0) {
        by_source.entry(edge.source.as_str()).or_default().push(edge);
    }
    for (source, edges) in by_source {
        let Some(top) = edges.iter().map(|e| e.priority).max() else {
            continue;
        };
        let mut top_conditions: FxHashMap<EdgeCondition, usize> = FxHashMap::default();
        for edge in edges.iter().filter(|e| e.priority == top) {
            if edge.condition != EdgeCondition::Conditional {
                *top_conditions.entry(edge.condition).or_default() += 1;
            }
        }
        for (condition, count) in top_conditions {
            if count > 1 {
                issues.push(ValidationIssue::new(format!(
                    "node {source} has {count} forward {condition:?} edges at equal top priority {top}; \
                     fan-out is not supported"
                )));
            }
        }
    }

    issues
}

/// For each node, the set of nodes from which it is reachable over forward
/// edges.
fn forward_ancestors(graph: &GraphSpec) -> FxHashMap<&str, FxHashSet<&str>> {
    let adjacency = graph.forward_adjacency();
    let mut ancestors: FxHashMap<&str, FxHashSet<&str>> = FxHashMap::default();

    for start in graph.nodes.iter().map(|n| n.id.as_str()) {
        // DFS from each node, marking it as an ancestor of everything reached.
        let mut stack: Vec<&str> = adjacency.get(start).cloned().unwrap_or_default();
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            ancestors.entry(current).or_default().insert(start);
            if let Some(next) = adjacency.get(current) {
                stack.extend(next.iter().copied());
            }
        }
    }

    ancestors
}
