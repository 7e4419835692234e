//! Goal block of a persisted graph document.
//!
//! Every graph is authored against a goal: a description of what the agent is
//! trying to achieve, measurable success criteria, and hard/soft constraints.
//! The runtime does not score goals itself — downstream analysis does — but
//! the goal text is rendered into LLM prompts so the model knows what it is
//! working toward.

use serde::{Deserialize, Serialize};

/// A measurable criterion contributing to goal success.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriterion {
    pub id: String,
    pub description: String,
    /// What is measured, e.g. `"accuracy"` or `"reply_rate"`.
    pub metric: String,
    /// Target value rendered verbatim into prompt context.
    pub target: String,
    /// Relative weight among criteria.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Whether violating a constraint invalidates the run or merely degrades it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintKind {
    Hard,
    Soft,
}

/// A boundary the agent must (hard) or should (soft) respect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub id: String,
    pub description: String,
    pub kind: ConstraintKind,
    /// Free-form grouping, e.g. `"budget"`, `"tone"`, `"compliance"`.
    #[serde(default)]
    pub category: String,
}

/// The goal driving a graph's execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub success_criteria: Vec<SuccessCriterion>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl Goal {
    /// Renders the goal as a prompt preamble for LLM nodes.
    ///
    /// The rendering is stable plain text: name and description first, then
    /// criteria and constraints as bullet lists. Empty sections are omitted.
    #[must_use]
    pub fn to_prompt_context(&self) -> String {
        let mut out = format!("Goal: {}\n{}\n", self.name, self.description);
        if !self.success_criteria.is_empty() {
            out.push_str("\nSuccess criteria:\n");
            for c in &self.success_criteria {
                out.push_str(&format!(
                    "- {} ({}: {}, weight {})\n",
                    c.description, c.metric, c.target, c.weight
                ));
            }
        }
        if !self.constraints.is_empty() {
            out.push_str("\nConstraints:\n");
            for c in &self.constraints {
                let kind = match c.kind {
                    ConstraintKind::Hard => "hard",
                    ConstraintKind::Soft => "soft",
                };
                out.push_str(&format!("- [{}] {}\n", kind, c.description));
            }
        }
        out
    }
}
