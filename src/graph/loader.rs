//! Loading and dumping persisted graph documents.
//!
//! Graphs persist as JSON documents: a header (id, version), an optional goal
//! block, the node and edge arrays, and the graph-config block with entry
//! points and pause/terminal sets. Loading always validates; a document that
//! violates any structural invariant is rejected whole.
//!
//! Round-trip guarantee: `from_json(to_json(g)) == g` for every valid graph.

use std::path::Path;

use miette::Diagnostic;
use thiserror::Error;

use crate::graph::spec::GraphSpec;
use crate::graph::validate::{validate, ValidationIssue};

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("failed to read graph document {path}: {source}")]
    #[diagnostic(code(goalgraph::graph::io))]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("graph document does not parse: {source}")]
    #[diagnostic(
        code(goalgraph::graph::parse),
        help("The document must be the JSON form produced by `dump`.")
    )]
    Parse {
        #[source]
        source: serde_json::Error,
    },

    #[error("graph failed validation with {} issue(s):\n{}", .issues.len(), render_issues(.issues))]
    #[diagnostic(
        code(goalgraph::graph::validation),
        help("Every listed invariant must hold before the graph can run.")
    )]
    Validation { issues: Vec<ValidationIssue> },

    #[error("failed to serialize graph: {source}")]
    #[diagnostic(code(goalgraph::graph::serialize))]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
}

fn render_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("  - {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses and validates a graph document from a file.
pub fn load(path: impl AsRef<Path>) -> Result<GraphSpec, GraphError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| GraphError::Io {
        path: path.display().to_string(),
        source,
    })?;
    from_json(&text)
}

/// Writes a graph document to a file in its canonical pretty-printed form.
pub fn dump(graph: &GraphSpec, path: impl AsRef<Path>) -> Result<(), GraphError> {
    let path = path.as_ref();
    let text = to_json(graph)?;
    std::fs::write(path, text).map_err(|source| GraphError::Io {
        path: path.display().to_string(),
        source,
    })
}

/// Parses and validates a graph from JSON text.
pub fn from_json(text: &str) -> Result<GraphSpec, GraphError> {
    let graph: GraphSpec =
        serde_json::from_str(text).map_err(|source| GraphError::Parse { source })?;
    check(&graph)?;
    Ok(graph)
}

/// Serializes a graph to its canonical JSON text.
pub fn to_json(graph: &GraphSpec) -> Result<String, GraphError> {
    serde_json::to_string_pretty(graph).map_err(|source| GraphError::Serialize { source })
}

/// Validates an in-memory graph, converting issues into the fatal error form.
pub fn check(graph: &GraphSpec) -> Result<(), GraphError> {
    let issues = validate(graph);
    if issues.is_empty() {
        Ok(())
    } else {
        Err(GraphError::Validation { issues })
    }
}
