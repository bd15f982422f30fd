//! [`ExecutionState`]: the single mutable focus of the engine. Everything
//! else the Registry loads is immutable once built; this is the one
//! structure the Workflow Executor and Orchestrator are each allowed to
//! write their own slice of.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stagecraft_core::EntityId;
use stagecraft_tracker::SkillExecution;
use std::collections::HashMap;
use uuid::Uuid;

/// Bumped whenever the persisted shape of [`ExecutionState`] changes, so
/// restoring an older checkpoint can be detected rather than silently
/// misread.
pub const SCHEMA_VERSION: u32 = 1;

/// Per-stage lifecycle: `Pending → InProgress → {Completed | Blocked}`,
/// with `retry` returning a `Blocked` stage to `InProgress`. `NeedsReview`
/// is an orthogonal hold state, entered only when a stage's declared gates
/// include a `custom_predicate` tagged `review_flag` that fires; it
/// resolves to `Completed` or `Blocked` via explicit operator action,
/// never automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
    NeedsReview,
}

/// A checkpoint descriptor as it appears in `ExecutionState.checkpoints`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointDescriptor {
    pub id: Uuid,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The persisted state blob: exactly the named fields, nothing more, so
/// restore is byte-equivalent modulo timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub schema_version: u32,
    pub current_stage_id: Option<EntityId>,
    pub current_role_id: Option<EntityId>,
    pub completed_stages: Vec<EntityId>,
    pub tracker: Vec<SkillExecution>,
    pub shared_context: HashMap<String, Value>,
    pub active_agents: HashMap<EntityId, EntityId>,
    pub checkpoints: Vec<CheckpointDescriptor>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            current_stage_id: None,
            current_role_id: None,
            completed_stages: Vec::new(),
            tracker: Vec::new(),
            shared_context: HashMap::new(),
            active_agents: HashMap::new(),
            checkpoints: Vec::new(),
        }
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn new_state_is_empty_and_carries_current_schema() {
        let state = ExecutionState::new();
        assert_eq!(state.schema_version, SCHEMA_VERSION);
        assert!(state.completed_stages.is_empty());
        assert!(state.current_stage_id.is_none());
    }

    #[test]
    fn round_trips_through_json() {
        let mut state = ExecutionState::new();
        state.completed_stages.push("stg1".to_string());
        state.shared_context.insert("k".to_string(), Value::String("v".to_string()));
        let json = serde_json::to_string(&state).unwrap();
        let back: ExecutionState = serde_json::from_str(&json).unwrap();
        assert_eq!(back.completed_stages, state.completed_stages);
        assert_eq!(back.shared_context, state.shared_context);
    }
}
