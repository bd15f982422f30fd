//! The event sink: a one-way stream of structured events the
//! engine emits as it runs a workflow. Consumers include CLI progress
//! renderers and test probes — this crate only defines the shape and a
//! trivial in-memory sink; `stagecraft-cli` supplies the terminal-facing one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stagecraft_core::EntityId;

/// One of the named event kinds the engine emits, carrying a timestamp,
/// workflow id, and payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    StageStarted { stage_id: EntityId, role_id: Option<EntityId> },
    StageCompleted { stage_id: EntityId },
    StageBlocked { stage_id: EntityId, findings: Vec<String> },
    TaskCreated { task_id: String, role_id: EntityId },
    TaskCompleted { task_id: String },
    SkillInvoked { skill_id: EntityId, owner_id: EntityId },
    SkillCompleted { skill_id: EntityId, owner_id: EntityId, success: bool },
    CheckpointCreated { checkpoint_id: String, name: Option<String> },
    GateFailed { stage_id: EntityId, gate_id: String, message: String },
    AgentMessage { from_agent: EntityId, to: String },
}

/// An envelope around an [`Event`] stamped with when and for which workflow
/// it occurred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub workflow_id: EntityId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

/// The sink trait the Orchestrator/Workflow Executor publish to. Kept
/// synchronous and infallible: a stalled or misbehaving consumer must never
/// block the engine.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EventEnvelope);
}

/// Drops every event. The default when no sink is configured.
#[derive(Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: EventEnvelope) {}
}

/// Collects every event in-process, for tests and for programmatic
/// consumers that want the full stream rather than a rendering.
#[derive(Default)]
pub struct RecordingEventSink {
    events: parking_lot::Mutex<Vec<EventEnvelope>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events.lock().clone()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: EventEnvelope) {
        self.events.lock().push(event);
    }
}
