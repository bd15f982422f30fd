//! Append-only execution log and historical skill scoring.
//!
//! The Tracker is the sole source of historical scoring for the Selector
//! (`stagecraft-selector`) and the sole source of idempotent-reuse lookups
//! for the Orchestrator (`stagecraft-orchestrator`).

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use stagecraft_core::EntityId;
use uuid::Uuid;

/// Outcome of a single skill invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failure,
    Timeout,
    Skipped,
}

impl ExecutionStatus {
    /// Timeouts count as failures for scoring purposes.
    fn counts_as_success(self) -> bool {
        matches!(self, ExecutionStatus::Success)
    }

    fn counts_toward_score(self) -> bool {
        matches!(self, ExecutionStatus::Success | ExecutionStatus::Failure | ExecutionStatus::Timeout)
    }
}

/// A single recorded skill invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillExecution {
    pub id: Uuid,
    pub skill_id: EntityId,
    /// The task or stage this execution was performed for.
    pub owner_id: EntityId,
    pub role_id: EntityId,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    pub error_kind: Option<String>,
    /// Real-valued score in `[0, 1]`, present only when `status == Success`.
    pub score: Option<f64>,
    pub input_digest: String,
    pub output_digest: Option<String>,
}

impl SkillExecution {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        skill_id: impl Into<EntityId>,
        owner_id: impl Into<EntityId>,
        role_id: impl Into<EntityId>,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        status: ExecutionStatus,
        error_kind: Option<String>,
        score: Option<f64>,
        input_digest: impl Into<String>,
        output_digest: Option<String>,
    ) -> Self {
        Self {
            id: stagecraft_core::new_id(),
            skill_id: skill_id.into(),
            owner_id: owner_id.into(),
            role_id: role_id.into(),
            started_at,
            ended_at,
            status,
            error_kind,
            score,
            input_digest: input_digest.into(),
            output_digest,
        }
    }
}

/// Parameters for the exponentially-weighted success-rate score.
#[derive(Debug, Clone, Copy)]
pub struct ScoringConfig {
    /// Half-life, in execution count, of the exponential weighting.
    pub half_life: f64,
    /// How many of the most recent executions for a skill to consider.
    pub window: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            half_life: 10.0,
            window: 100,
        }
    }
}

/// Append-only ordered log of skill executions.
pub struct Tracker {
    log: RwLock<Vec<SkillExecution>>,
    scoring: ScoringConfig,
}

impl Tracker {
    pub fn new() -> Self {
        Self::with_scoring(ScoringConfig::default())
    }

    pub fn with_scoring(scoring: ScoringConfig) -> Self {
        Self {
            log: RwLock::new(Vec::new()),
            scoring,
        }
    }

    /// Append an execution record. Failures never remove prior successes —
    /// this is purely additive.
    pub fn record(&self, exec: SkillExecution) {
        self.log.write().push(exec);
    }

    pub fn history_for_skill(&self, skill_id: &str) -> Vec<SkillExecution> {
        self.log
            .read()
            .iter()
            .filter(|e| e.skill_id == skill_id)
            .cloned()
            .collect()
    }

    /// The `n` most recently recorded executions, across all skills, newest first.
    pub fn recent(&self, n: usize) -> Vec<SkillExecution> {
        let log = self.log.read();
        log.iter().rev().take(n).cloned().collect()
    }

    /// Exponentially-weighted success rate for a skill over the last `window`
    /// executions (half-life `half_life`). `None` when the skill has never
    /// been executed — callers should treat that as a default of 0.5.
    pub fn score_of(&self, skill_id: &str) -> Option<f64> {
        let log = self.log.read();
        let mut relevant: Vec<&SkillExecution> = log
            .iter()
            .filter(|e| e.skill_id == skill_id && e.status.counts_toward_score())
            .collect();
        if relevant.is_empty() {
            return None;
        }
        relevant.sort_by_key(|e| e.ended_at);
        let windowed: Vec<&&SkillExecution> =
            relevant.iter().rev().take(self.scoring.window).collect();

        let mut weighted_success = 0.0;
        let mut weighted_total = 0.0;
        for (age, exec) in windowed.into_iter().enumerate() {
            let weight = 0.5_f64.powf(age as f64 / self.scoring.half_life);
            weighted_total += weight;
            if exec.status.counts_as_success() {
                weighted_success += weight;
            }
        }
        if weighted_total == 0.0 {
            None
        } else {
            Some(weighted_success / weighted_total)
        }
    }

    /// Look up a prior successful execution for this skill+owner with a
    /// matching `input_digest`, used by the Orchestrator's idempotent-reuse
    /// check. Only meaningful for deterministic skills.
    pub fn find_reusable(
        &self,
        skill_id: &str,
        owner_id: &str,
        input_digest: &str,
    ) -> Option<SkillExecution> {
        self.log
            .read()
            .iter()
            .rev()
            .find(|e| {
                e.skill_id == skill_id
                    && e.owner_id == owner_id
                    && e.input_digest == input_digest
                    && e.status == ExecutionStatus::Success
            })
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.log.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot the full log, used by the Checkpoint Manager.
    pub fn snapshot(&self) -> Vec<SkillExecution> {
        self.log.read().clone()
    }

    /// Replace the log wholesale, used when restoring a checkpoint.
    pub fn restore(&self, entries: Vec<SkillExecution>) {
        *self.log.write() = entries;
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn exec(skill: &str, status: ExecutionStatus, ago_secs: i64) -> SkillExecution {
        let ended = Utc::now() - chrono::Duration::seconds(ago_secs);
        SkillExecution::new(
            skill,
            "owner",
            "role",
            ended - chrono::Duration::milliseconds(50),
            ended,
            status,
            None,
            if status == ExecutionStatus::Success { Some(1.0) } else { None },
            "digest",
            None,
        )
    }

    #[test]
    fn unseen_skill_has_no_score() {
        let t = Tracker::new();
        assert_eq!(t.score_of("nope"), None);
    }

    #[test]
    fn all_successes_score_near_one() {
        let t = Tracker::new();
        for i in 0..5 {
            t.record(exec("s1", ExecutionStatus::Success, i * 10));
        }
        let score = t.score_of("s1").unwrap();
        assert!(score > 0.9, "expected near-1.0 score, got {score}");
    }

    #[test]
    fn failures_do_not_remove_prior_successes() {
        let t = Tracker::new();
        t.record(exec("s1", ExecutionStatus::Success, 100));
        t.record(exec("s1", ExecutionStatus::Failure, 0));
        assert_eq!(t.history_for_skill("s1").len(), 2);
    }

    #[test]
    fn timeouts_count_as_failures() {
        let t = Tracker::new();
        t.record(exec("s1", ExecutionStatus::Timeout, 0));
        let score = t.score_of("s1").unwrap();
        assert!(score < 0.5);
    }

    #[test]
    fn recent_weighting_favors_newer_executions() {
        let t = Tracker::new();
        // Old failures, recent successes: score should trend high.
        for i in 0..20 {
            t.record(exec("s1", ExecutionStatus::Failure, 1000 + i));
        }
        for i in 0..5 {
            t.record(exec("s1", ExecutionStatus::Success, i));
        }
        let score = t.score_of("s1").unwrap();
        assert!(score > 0.5, "expected recency to dominate, got {score}");
    }

    #[test]
    fn find_reusable_matches_digest() {
        let t = Tracker::new();
        let mut e = exec("s1", ExecutionStatus::Success, 0);
        e.owner_id = "task-1".into();
        e.input_digest = "abc123".into();
        t.record(e);

        assert!(t.find_reusable("s1", "task-1", "abc123").is_some());
        assert!(t.find_reusable("s1", "task-1", "different").is_none());
    }

    #[test]
    fn checkpoint_roundtrip_preserves_log() {
        let t = Tracker::new();
        t.record(exec("s1", ExecutionStatus::Success, 0));
        t.record(exec("s2", ExecutionStatus::Failure, 5));
        let snap = t.snapshot();

        let t2 = Tracker::new();
        t2.restore(snap);
        assert_eq!(t2.len(), 2);
    }
}
