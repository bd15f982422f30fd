//! [`Task`] and [`TaskDecomposition`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stagecraft_core::EntityId;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
    /// Held for explicit operator resolution. Orthogonal to `Blocked` stage
    /// status — see `stagecraft-orchestrator`.
    NeedsReview,
}

/// A unit of work produced by the Decomposer, executed by a single agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub description: String,
    pub role_id: EntityId,
    pub depends_on: Vec<Uuid>,
    pub status: TaskStatus,
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    /// The task that spawned this one as a sub-task, if any (supplemented
    /// sub-task spawning, `stagecraft-orchestrator`'s `SubAgentSpawner`).
    #[serde(default)]
    pub parent_task: Option<Uuid>,
    /// Depth in the task hierarchy; 0 for every task produced directly by
    /// [`crate::Decomposer`].
    #[serde(default)]
    pub depth: u32,
}

impl Task {
    /// A task as directly produced by decomposition: no parent, depth 0.
    pub fn is_root(&self) -> bool {
        self.parent_task.is_none()
    }
}

/// The result of decomposing one goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDecomposition {
    pub tasks: Vec<Task>,
    /// Groups of mutually independent task ids, in dependency order; group 0
    /// has no unmet dependencies, group 1 depends only on group 0, etc.
    pub execution_order: Vec<Vec<Uuid>>,
    /// Adjacency map: task id → the ids it depends on.
    pub dependency_graph: HashMap<Uuid, Vec<Uuid>>,
}

impl TaskDecomposition {
    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }
}
