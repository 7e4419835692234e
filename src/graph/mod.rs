//! Graph descriptions: goal block, node/edge specs, predicates, loading and
//! validation.

pub mod goal;
pub mod loader;
pub mod predicate;
pub mod spec;
pub mod validate;

pub use goal::{Constraint, ConstraintKind, Goal, SuccessCriterion};
pub use loader::{check, dump, from_json, load, to_json, GraphError};
pub use predicate::{Predicate, PredicateError};
pub use spec::{
    EdgeCondition, EdgeSpec, GraphConfig, GraphSpec, NodeSpec, RouteRule, DEFAULT_ENTRY_POINT,
    RESUME_INPUT_KEY,
};
pub use validate::{validate, ValidationIssue};
