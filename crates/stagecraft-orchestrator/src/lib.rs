//! The Orchestrator and Workflow Executor, plus the supporting ambient state
//! the rest of this workspace's layers feed into: persisted
//! [`state::ExecutionState`], file-backed checkpointing, the task queue used
//! by `execute_with_collaboration`, the structured event stream, per-role
//! metrics, sub-task spawning, and human-in-the-loop review-marker
//! detection — all driven by a registry-defined stage graph rather than any
//! fixed pipeline.

pub mod checkpoint;
pub mod events;
pub mod executor;
pub mod monitor;
pub mod orchestrator;
pub mod queue;
pub mod review;
pub mod spawner;
pub mod state;

pub use checkpoint::{CheckpointManager, CheckpointStore, FileCheckpointStore};
pub use events::{Event, EventEnvelope, EventSink, NullEventSink, RecordingEventSink};
pub use executor::{StageTransition, WorkflowExecutor};
pub use monitor::{AgentMetrics, AgentMonitor, AgentState, WorkerStatus};
pub use orchestrator::{Orchestrator, StageOutcome};
pub use queue::TaskQueue;
pub use review::detect_review_markers;
pub use spawner::{SpawnRequest, SubAgentSpawner};
pub use state::{CheckpointDescriptor, ExecutionState, StageStatus, SCHEMA_VERSION};
