//! Small shared helpers: prompt templating, LLM payload extraction, ids.

pub mod id;
pub mod json_extract;
pub mod template;
