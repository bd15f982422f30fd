//! Per-role metrics/state snapshot, keyed by free-form [`EntityId`] role ids
//! since [`stagecraft_registry::Role`] is config-driven rather than a
//! closed set.

use serde::Serialize;
use stagecraft_core::EntityId;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Working,
    WaitingForApproval,
    Error,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentMetrics {
    pub total_turns: u32,
    pub total_tool_calls: u32,
    pub errors: u32,
    pub duration_ms: u64,
    pub tokens_used: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentState {
    pub role_id: EntityId,
    pub current_task: Option<Uuid>,
    pub status: WorkerStatus,
    pub metrics: AgentMetrics,
}

impl AgentState {
    fn idle(role_id: EntityId) -> Self {
        Self {
            role_id,
            current_task: None,
            status: WorkerStatus::Idle,
            metrics: AgentMetrics::default(),
        }
    }
}

/// Tracks state and metrics for every role active in a workflow run.
/// Entries are created lazily on first use, since the set of roles is
/// whatever the loaded Registry declares rather than a fixed enum.
#[derive(Default)]
pub struct AgentMonitor {
    states: RwLock<HashMap<EntityId, AgentState>>,
}

impl AgentMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start_task(&self, role_id: &str, task_id: Uuid) {
        let mut states = self.states.write().await;
        let state = states.entry(role_id.to_string()).or_insert_with(|| AgentState::idle(role_id.to_string()));
        state.current_task = Some(task_id);
        state.status = WorkerStatus::Working;
    }

    pub async fn finish_task(&self, role_id: &str) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(role_id) {
            state.current_task = None;
            state.status = WorkerStatus::Idle;
        }
    }

    pub async fn waiting_for_approval(&self, role_id: &str) {
        let mut states = self.states.write().await;
        let state = states.entry(role_id.to_string()).or_insert_with(|| AgentState::idle(role_id.to_string()));
        state.status = WorkerStatus::WaitingForApproval;
    }

    pub async fn record_error(&self, role_id: &str) {
        let mut states = self.states.write().await;
        let state = states.entry(role_id.to_string()).or_insert_with(|| AgentState::idle(role_id.to_string()));
        state.metrics.errors += 1;
        state.status = WorkerStatus::Error;
    }

    pub async fn record_turn(&self, role_id: &str, tool_calls: u32, tokens: u64) {
        let mut states = self.states.write().await;
        let state = states.entry(role_id.to_string()).or_insert_with(|| AgentState::idle(role_id.to_string()));
        state.metrics.total_turns += 1;
        state.metrics.total_tool_calls += tool_calls;
        state.metrics.tokens_used += tokens;
    }

    pub async fn record_duration(&self, role_id: &str, duration_ms: u64) {
        let mut states = self.states.write().await;
        let state = states.entry(role_id.to_string()).or_insert_with(|| AgentState::idle(role_id.to_string()));
        state.metrics.duration_ms += duration_ms;
    }

    pub async fn snapshot(&self) -> Vec<AgentState> {
        self.states.read().await.values().cloned().collect()
    }

    pub async fn get_state(&self, role_id: &str) -> Option<AgentState> {
        self.states.read().await.get(role_id).cloned()
    }

    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        let states = self.states.read().await;
        let mut total = AgentMetrics::default();
        for state in states.values() {
            total.total_turns += state.metrics.total_turns;
            total.total_tool_calls += state.metrics.total_tool_calls;
            total.errors += state.metrics.errors;
            total.duration_ms += state.metrics.duration_ms;
            total.tokens_used += state.metrics.tokens_used;
        }
        total
    }

    pub async fn to_json(&self) -> serde_json::Value {
        let states = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({ "agents": states, "aggregate": aggregate })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_role_has_no_state_until_touched() {
        let monitor = AgentMonitor::new();
        assert!(monitor.get_state("coder").await.is_none());
    }

    #[tokio::test]
    async fn start_and_finish_task() {
        let monitor = AgentMonitor::new();
        let task_id = Uuid::new_v4();
        monitor.start_task("coder", task_id).await;
        let state = monitor.get_state("coder").await.unwrap();
        assert_eq!(state.status, WorkerStatus::Working);
        assert_eq!(state.current_task, Some(task_id));

        monitor.finish_task("coder").await;
        let state = monitor.get_state("coder").await.unwrap();
        assert_eq!(state.status, WorkerStatus::Idle);
        assert!(state.current_task.is_none());
    }

    #[tokio::test]
    async fn record_metrics_accumulate() {
        let monitor = AgentMonitor::new();
        monitor.record_turn("coder", 3, 1500).await;
        monitor.record_turn("coder", 2, 1000).await;
        monitor.record_duration("coder", 5000).await;

        let state = monitor.get_state("coder").await.unwrap();
        assert_eq!(state.metrics.total_turns, 2);
        assert_eq!(state.metrics.total_tool_calls, 5);
        assert_eq!(state.metrics.tokens_used, 2500);
        assert_eq!(state.metrics.duration_ms, 5000);
    }

    #[tokio::test]
    async fn record_error_sets_status() {
        let monitor = AgentMonitor::new();
        monitor.record_error("tester").await;
        let state = monitor.get_state("tester").await.unwrap();
        assert_eq!(state.metrics.errors, 1);
        assert_eq!(state.status, WorkerStatus::Error);
    }

    #[tokio::test]
    async fn aggregate_metrics_sums_across_roles() {
        let monitor = AgentMonitor::new();
        monitor.record_turn("coder", 3, 1000).await;
        monitor.record_turn("tester", 2, 500).await;
        monitor.record_error("tester").await;

        let agg = monitor.aggregate_metrics().await;
        assert_eq!(agg.total_turns, 2);
        assert_eq!(agg.total_tool_calls, 5);
        assert_eq!(agg.tokens_used, 1500);
        assert_eq!(agg.errors, 1);
    }

    #[tokio::test]
    async fn to_json_has_expected_shape() {
        let monitor = AgentMonitor::new();
        monitor.record_turn("spec", 1, 200).await;
        let json = monitor.to_json().await;
        assert!(json["agents"].is_array());
        assert!(json["aggregate"].is_object());
    }
}
