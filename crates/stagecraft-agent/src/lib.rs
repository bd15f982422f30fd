//! The reasoning layer: builds context, chooses intents, and
//! reviews peer output. An [`Agent`] never invokes a skill directly — it
//! returns intents to the Orchestrator, which consults the Selector and
//! Invoker on its behalf. This crate intentionally has no dependency edge on
//! `stagecraft-invoker`, so that separation is enforced at compile time, not
//! just by convention.

mod agent;
mod context;
mod intent;

pub use agent::Agent;
pub use context::AgentContext;
pub use intent::{Intent, ReviewOutcome};
