//! Identifier generation for runs and decisions.
//!
//! Ids are time-ordered and unique within a process: a UTC timestamp prefix
//! keeps snapshot directories and trace files sortable, a process-wide
//! counter disambiguates ids minted in the same millisecond.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_suffix() -> u64 {
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Mints a run id, e.g. `run-20250802T101502123-0042`.
#[must_use]
pub fn run_id() -> String {
    format!(
        "run-{}-{:04}",
        Utc::now().format("%Y%m%dT%H%M%S%3f"),
        next_suffix() % 10_000
    )
}

/// Mints a decision id, e.g. `dec-20250802T101502123-0043`.
#[must_use]
pub fn decision_id() -> String {
    format!(
        "dec-{}-{:04}",
        Utc::now().format("%Y%m%dT%H%M%S%3f"),
        next_suffix() % 10_000
    )
}
