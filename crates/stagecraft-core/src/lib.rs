//! Shared primitives for the stagecraft orchestration engine.
//!
//! This crate carries the things every other `stagecraft-*` crate needs:
//! the unified error taxonomy ([`StagecraftError`]), a minimal JSON-Schema
//! validator used by the invoker layer, and a content-digest helper used by
//! the tracker and orchestrator for idempotent-reuse checks.

mod cancel;
mod digest;
mod error;
pub mod schema;

pub use cancel::CancellationToken;
pub use digest::digest_of;
pub use error::{ConfigError, StagecraftError, StagecraftResult};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Newtype id for a [`Skill`]-like entity, kept as a plain `String` to match
/// the free-form ids used throughout the config provider's source documents.
pub type EntityId = String;

/// Generates a fresh random identifier for run-time entities (tasks,
/// executions, messages, checkpoints).
pub fn new_id() -> Uuid {
    Uuid::new_v4()
}

/// The current UTC time, used for every timestamp field in the data model.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
