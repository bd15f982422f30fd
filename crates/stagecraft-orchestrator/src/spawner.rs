//! Sub-task spawning with depth/fan-out caps. Lets a task's outputs grow
//! the task graph during
//! [`crate::orchestrator::Orchestrator::execute_with_collaboration`] without
//! letting a misbehaving agent spawn an unbounded tree.

use serde::Deserialize;
use stagecraft_core::{EntityId, StagecraftError, StagecraftResult};
use stagecraft_decompose::{Task, TaskStatus};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::queue::TaskQueue;

/// A request to grow the task graph, as produced by an agent's output (see
/// the `spawn_requests` output convention in `execute_with_collaboration`).
#[derive(Debug, Clone, Deserialize)]
pub struct SpawnRequest {
    pub description: String,
    pub role_id: EntityId,
    pub parent_task_id: Uuid,
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
}

/// Bounds how many sub-tasks a task may spawn and how deep the resulting
/// tree may grow.
pub struct SubAgentSpawner {
    max_depth: u32,
    max_children_per_task: u32,
    queue: Arc<RwLock<TaskQueue>>,
}

impl SubAgentSpawner {
    pub fn new(queue: Arc<RwLock<TaskQueue>>) -> Self {
        Self {
            max_depth: 3,
            max_children_per_task: 5,
            queue,
        }
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_max_children(mut self, max: u32) -> Self {
        self.max_children_per_task = max;
        self
    }

    /// Validates depth/fan-out under a read lock, then inserts the new task
    /// under a write lock — split to avoid holding the write lock while
    /// walking sibling state.
    pub async fn spawn(&self, request: SpawnRequest) -> StagecraftResult<Uuid> {
        let (depth, parent_role) = {
            let queue = self.queue.read().await;
            let parent = queue.get(request.parent_task_id).ok_or_else(|| {
                StagecraftError::Validation(format!(
                    "spawn: parent task '{}' not found",
                    request.parent_task_id
                ))
            })?;

            let depth = parent.depth + 1;
            if depth > self.max_depth {
                return Err(StagecraftError::Validation(format!(
                    "spawn: max depth {} exceeded for parent '{}'",
                    self.max_depth, request.parent_task_id
                )));
            }

            let children = queue
                .all_tasks()
                .into_iter()
                .filter(|t| t.parent_task == Some(request.parent_task_id))
                .count();
            if children as u32 >= self.max_children_per_task {
                return Err(StagecraftError::Validation(format!(
                    "spawn: max children {} exceeded for parent '{}'",
                    self.max_children_per_task, request.parent_task_id
                )));
            }

            (depth, parent.role_id.clone())
        };

        let role_id = if request.role_id.is_empty() { parent_role } else { request.role_id };

        let task = Task {
            id: stagecraft_core::new_id(),
            description: request.description,
            role_id,
            depends_on: request.depends_on,
            status: TaskStatus::Pending,
            inputs: Default::default(),
            outputs: Default::default(),
            error: None,
            created_at: stagecraft_core::now(),
            parent_task: Some(request.parent_task_id),
            depth,
        };

        let mut queue = self.queue.write().await;
        Ok(queue.add(task))
    }

    pub async fn children_of(&self, parent_id: Uuid) -> Vec<Uuid> {
        let queue = self.queue.read().await;
        queue
            .all_tasks()
            .into_iter()
            .filter(|t| t.parent_task == Some(parent_id))
            .map(|t| t.id)
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn root_task() -> Task {
        Task {
            id: Uuid::new_v4(),
            description: "root".into(),
            role_id: "builder".into(),
            depends_on: vec![],
            status: TaskStatus::Pending,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            error: None,
            created_at: chrono::Utc::now(),
            parent_task: None,
            depth: 0,
        }
    }

    async fn queue_with_root() -> (Arc<RwLock<TaskQueue>>, Uuid) {
        let mut queue = TaskQueue::new();
        let root = root_task();
        let id = root.id;
        queue.add(root);
        (Arc::new(RwLock::new(queue)), id)
    }

    #[tokio::test]
    async fn spawn_inherits_depth_and_parent() {
        let (queue, root_id) = queue_with_root().await;
        let spawner = SubAgentSpawner::new(Arc::clone(&queue));
        let child_id = spawner
            .spawn(SpawnRequest {
                description: "sub".into(),
                role_id: "builder".into(),
                parent_task_id: root_id,
                depends_on: vec![],
            })
            .await
            .expect("spawn");

        let q = queue.read().await;
        let child = q.get(child_id).unwrap();
        assert_eq!(child.depth, 1);
        assert_eq!(child.parent_task, Some(root_id));
    }

    #[tokio::test]
    async fn spawn_rejects_missing_parent() {
        let (queue, _root_id) = queue_with_root().await;
        let spawner = SubAgentSpawner::new(queue);
        let err = spawner
            .spawn(SpawnRequest {
                description: "sub".into(),
                role_id: "builder".into(),
                parent_task_id: Uuid::new_v4(),
                depends_on: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StagecraftError::Validation(_)));
    }

    #[tokio::test]
    async fn spawn_enforces_max_depth() {
        let (queue, root_id) = queue_with_root().await;
        let spawner = SubAgentSpawner::new(Arc::clone(&queue)).with_max_depth(1);
        let child = spawner
            .spawn(SpawnRequest {
                description: "sub".into(),
                role_id: "builder".into(),
                parent_task_id: root_id,
                depends_on: vec![],
            })
            .await
            .expect("first spawn within depth");

        let err = spawner
            .spawn(SpawnRequest {
                description: "grandchild".into(),
                role_id: "builder".into(),
                parent_task_id: child,
                depends_on: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StagecraftError::Validation(_)));
    }

    #[tokio::test]
    async fn spawn_enforces_max_children() {
        let (queue, root_id) = queue_with_root().await;
        let spawner = SubAgentSpawner::new(Arc::clone(&queue)).with_max_children(1);
        spawner
            .spawn(SpawnRequest {
                description: "sub1".into(),
                role_id: "builder".into(),
                parent_task_id: root_id,
                depends_on: vec![],
            })
            .await
            .expect("first child ok");

        let err = spawner
            .spawn(SpawnRequest {
                description: "sub2".into(),
                role_id: "builder".into(),
                parent_task_id: root_id,
                depends_on: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StagecraftError::Validation(_)));
    }

    #[tokio::test]
    async fn children_of_filters_by_parent() {
        let (queue, root_id) = queue_with_root().await;
        let spawner = SubAgentSpawner::new(Arc::clone(&queue));
        let c1 = spawner
            .spawn(SpawnRequest {
                description: "c1".into(),
                role_id: "builder".into(),
                parent_task_id: root_id,
                depends_on: vec![],
            })
            .await
            .expect("spawn c1");

        assert_eq!(spawner.children_of(root_id).await, vec![c1]);
        assert!(spawner.children_of(c1).await.is_empty());
    }
}
