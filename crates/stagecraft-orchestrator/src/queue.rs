//! A mutable task queue wrapping [`stagecraft_decompose::Task`], keyed by
//! its `depends_on`/`parent_task`/`depth` fields. Used by
//! `execute_with_collaboration` to track tasks across an
//! `execution_order` group and by [`crate::spawner::SubAgentSpawner`] to
//! grow the graph within the depth/fan-out caps.

use stagecraft_decompose::{Task, TaskStatus};
use std::collections::HashMap;
use uuid::Uuid;

/// Holds every task produced by one decomposition (plus any spawned
/// sub-tasks) and tracks completion order.
#[derive(Default)]
pub struct TaskQueue {
    tasks: HashMap<Uuid, Task>,
    completed: Vec<Uuid>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, task: Task) -> Uuid {
        let id = task.id;
        self.tasks.insert(id, task);
        id
    }

    fn is_ready(&self, task: &Task) -> bool {
        task.status == TaskStatus::Pending
            && task.depends_on.iter().all(|dep| self.completed.contains(dep))
    }

    /// The single oldest ready task, if any (sorted by `created_at`).
    pub fn next_ready(&self) -> Option<&Task> {
        self.all_ready().into_iter().next()
    }

    /// Every ready task, oldest first.
    pub fn all_ready(&self) -> Vec<&Task> {
        let mut ready: Vec<&Task> = self.tasks.values().filter(|t| self.is_ready(t)).collect();
        ready.sort_by_key(|t| t.created_at);
        ready
    }

    pub fn mark_running(&mut self, id: Uuid) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) => {
                task.status = TaskStatus::Running;
                true
            }
            None => false,
        }
    }

    pub fn mark_completed(&mut self, id: Uuid) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) => {
                task.status = TaskStatus::Completed;
                self.completed.push(id);
                true
            }
            None => false,
        }
    }

    pub fn mark_failed(&mut self, id: Uuid, reason: impl Into<String>) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) => {
                task.status = TaskStatus::Failed;
                task.error = Some(reason.into());
                true
            }
            None => false,
        }
    }

    pub fn mark_needs_review(&mut self, id: Uuid) -> bool {
        match self.tasks.get_mut(&id) {
            Some(task) => {
                task.status = TaskStatus::NeedsReview;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    pub fn all_tasks(&self) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self.tasks.values().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.values().filter(|t| t.status == TaskStatus::Pending).count()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn total_count(&self) -> usize {
        self.tasks.len()
    }

    /// Whether every task has reached a terminal status.
    pub fn is_done(&self) -> bool {
        self.tasks.values().all(|t| {
            matches!(
                t.status,
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::NeedsReview | TaskStatus::Skipped
            )
        })
    }

    pub fn needs_review_count(&self) -> usize {
        self.tasks.values().filter(|t| t.status == TaskStatus::NeedsReview).count()
    }

    /// Whether `depends_on` edges form a cycle.
    pub fn has_cycle(&self) -> bool {
        let mut state: HashMap<Uuid, u8> = HashMap::new();
        for id in self.tasks.keys() {
            if self.dfs_cycle(*id, &mut state) {
                return true;
            }
        }
        false
    }

    fn dfs_cycle(&self, id: Uuid, state: &mut HashMap<Uuid, u8>) -> bool {
        match state.get(&id) {
            Some(1) => return true,
            Some(2) => return false,
            _ => {}
        }
        state.insert(id, 1);
        if let Some(task) = self.tasks.get(&id) {
            for dep in &task.depends_on {
                if self.dfs_cycle(*dep, state) {
                    return true;
                }
            }
        }
        state.insert(id, 2);
        false
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn task(depends_on: Vec<Uuid>) -> Task {
        Task {
            id: Uuid::new_v4(),
            description: "do it".into(),
            role_id: "builder".into(),
            depends_on,
            status: TaskStatus::Pending,
            inputs: Map::new(),
            outputs: Map::new(),
            error: None,
            created_at: chrono::Utc::now(),
            parent_task: None,
            depth: 0,
        }
    }

    #[test]
    fn empty_queue_is_done() {
        let queue = TaskQueue::new();
        assert!(queue.is_done());
        assert_eq!(queue.total_count(), 0);
    }

    #[test]
    fn task_with_no_deps_is_immediately_ready() {
        let mut queue = TaskQueue::new();
        let id = queue.add(task(vec![]));
        assert_eq!(queue.next_ready().map(|t| t.id), Some(id));
    }

    #[test]
    fn task_with_unmet_dep_is_not_ready() {
        let mut queue = TaskQueue::new();
        let dep = queue.add(task(vec![]));
        let _child = queue.add(task(vec![dep]));
        let ready: Vec<Uuid> = queue.all_ready().into_iter().map(|t| t.id).collect();
        assert_eq!(ready, vec![dep]);
    }

    #[test]
    fn completing_dep_unblocks_child() {
        let mut queue = TaskQueue::new();
        let dep = queue.add(task(vec![]));
        let child = queue.add(task(vec![dep]));
        queue.mark_completed(dep);
        let ready: Vec<Uuid> = queue.all_ready().into_iter().map(|t| t.id).collect();
        assert_eq!(ready, vec![child]);
    }

    #[test]
    fn parallel_ready_tasks_with_no_deps() {
        let mut queue = TaskQueue::new();
        queue.add(task(vec![]));
        queue.add(task(vec![]));
        assert_eq!(queue.all_ready().len(), 2);
    }

    #[test]
    fn mark_failed_sets_error_and_status() {
        let mut queue = TaskQueue::new();
        let id = queue.add(task(vec![]));
        queue.mark_failed(id, "boom");
        let t = queue.get(id).unwrap();
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.error.as_deref(), Some("boom"));
    }

    #[test]
    fn mark_needs_review_is_not_done() {
        let mut queue = TaskQueue::new();
        let id = queue.add(task(vec![]));
        queue.mark_needs_review(id);
        assert!(queue.is_done());
        assert_eq!(queue.needs_review_count(), 1);
    }

    #[test]
    fn is_done_false_while_pending_tasks_remain() {
        let mut queue = TaskQueue::new();
        let a = queue.add(task(vec![]));
        queue.add(task(vec![]));
        queue.mark_completed(a);
        assert!(!queue.is_done());
    }

    #[test]
    fn detects_two_node_cycle() {
        let mut queue = TaskQueue::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut ta = task(vec![b]);
        ta.id = a;
        let mut tb = task(vec![a]);
        tb.id = b;
        queue.add(ta);
        queue.add(tb);
        assert!(queue.has_cycle());
    }

    #[test]
    fn no_cycle_in_a_dependency_chain() {
        let mut queue = TaskQueue::new();
        let a = queue.add(task(vec![]));
        let b = queue.add(task(vec![a]));
        queue.add(task(vec![b]));
        assert!(!queue.has_cycle());
    }
}
