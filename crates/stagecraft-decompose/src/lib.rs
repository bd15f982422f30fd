//! Goal decomposition: turns a free-form goal into a
//! [`TaskDecomposition`] with role-assigned tasks and a dependency graph,
//! via an LLM strategy with an always-available rule-based fallback.

mod decompose;
mod task;

pub use decompose::Decomposer;
pub use task::{Task, TaskDecomposition, TaskStatus};
