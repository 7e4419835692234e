//! `{name}` substitution for system prompt templates.
//!
//! Templates are rendered against a node's input view before any provider
//! call is made. A placeholder naming a key that is absent from the view is a
//! hard error — the node must not reach the LLM with an incomplete prompt.
//!
//! Supported syntax:
//! - `{name}` substitutes the value under `name` (strings render bare, other
//!   values render as JSON).
//! - `{{` and `}}` render literal braces.
//!
//! # Examples
//!
//! ```
//! use goalgraph::utils::template::render;
//! use rustc_hash::FxHashMap;
//! use serde_json::json;
//!
//! let mut view = FxHashMap::default();
//! view.insert("topic".to_string(), json!("rust"));
//! let out = render("Research {topic} thoroughly.", &view).unwrap();
//! assert_eq!(out, "Research rust thoroughly.");
//! ```

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum TemplateError {
    /// A placeholder names a key that is not present in the input view.
    #[error("template references missing input key: {key}")]
    #[diagnostic(
        code(goalgraph::template::missing_key),
        help("Declare the key as a node input or remove the placeholder.")
    )]
    MissingKey { key: String },

    /// An opening brace was never closed.
    #[error("unterminated placeholder starting at byte {at}")]
    #[diagnostic(code(goalgraph::template::unterminated))]
    Unterminated { at: usize },
}

/// Renders a template against an input view.
pub fn render(template: &str, view: &FxHashMap<String, Value>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '{' => {
                if matches!(chars.peek(), Some((_, '{'))) {
                    chars.next();
                    out.push('{');
                    continue;
                }
                let mut key = String::new();
                let mut closed = false;
                for (_, k) in chars.by_ref() {
                    if k == '}' {
                        closed = true;
                        break;
                    }
                    key.push(k);
                }
                if !closed {
                    return Err(TemplateError::Unterminated { at: i });
                }
                let key = key.trim();
                match view.get(key) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(other) => out.push_str(&other.to_string()),
                    None => {
                        return Err(TemplateError::MissingKey {
                            key: key.to_string(),
                        })
                    }
                }
            }
            '}' => {
                if matches!(chars.peek(), Some((_, '}'))) {
                    chars.next();
                }
                out.push('}');
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

/// Collects the placeholder names a template references.
///
/// Used by the validator to cross-check templates against declared inputs
/// without rendering.
#[must_use]
pub fn placeholder_names(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '{' {
            if matches!(chars.peek(), Some('{')) {
                chars.next();
                continue;
            }
            let mut key = String::new();
            for k in chars.by_ref() {
                if k == '}' {
                    let trimmed = key.trim().to_string();
                    if !trimmed.is_empty() && !names.contains(&trimmed) {
                        names.push(trimmed);
                    }
                    break;
                }
                key.push(k);
            }
        }
    }
    names
}
