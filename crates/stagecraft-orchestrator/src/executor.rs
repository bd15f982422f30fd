//! The Workflow Executor: the stage state machine —
//! `Pending → InProgress → {Completed | Blocked}`, with `NeedsReview` as an
//! orthogonal hold state — plus `wfauto`, the fully-automated run loop,
//! driven by the registry's stage graph rather than any fixed pipeline.
//!
//! This is the only component that mutates [`ExecutionState`]; the
//! Orchestrator it owns mutates only the Tracker append log.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use stagecraft_core::{EntityId, StagecraftError, StagecraftResult};
use stagecraft_registry::{Registry, Role, Stage};

use crate::checkpoint::CheckpointManager;
use crate::events::{Event, EventEnvelope, EventSink, NullEventSink};
use crate::orchestrator::{Orchestrator, StageOutcome};
use crate::state::{ExecutionState, StageStatus};

/// The outcome of one `start`/`retry`/`wfauto` step for a single stage:
/// its resulting status and, for `Blocked`, the gate findings (or, for a
/// body failure with no outputs to gate, the failure message) an operator
/// would read.
#[derive(Debug, Clone)]
pub struct StageTransition {
    pub stage_id: EntityId,
    pub status: StageStatus,
    pub findings: Vec<String>,
}

/// Drives one [`Registry`]'s workflow through the stage state machine,
/// owning the single mutable [`ExecutionState`] and delegating all actual
/// work (agent, selector, invoker, tracker) to an [`Orchestrator`].
pub struct WorkflowExecutor<'a> {
    workflow_id: EntityId,
    registry: &'a Registry,
    orchestrator: Orchestrator<'a>,
    checkpoints: CheckpointManager,
    sink: Arc<dyn EventSink>,
    state: RwLock<ExecutionState>,
    stage_status: RwLock<HashMap<EntityId, StageStatus>>,
    stage_findings: RwLock<HashMap<EntityId, Vec<String>>>,
    /// The role resolved for each stage the first time it ran, remembered so
    /// `retry(stage_id)` — which takes no role argument — can re-run the
    /// same stage with the same role.
    stage_roles: RwLock<HashMap<EntityId, EntityId>>,
}

impl<'a> WorkflowExecutor<'a> {
    pub fn new(
        workflow_id: impl Into<EntityId>,
        registry: &'a Registry,
        orchestrator: Orchestrator<'a>,
        checkpoints: CheckpointManager,
    ) -> Self {
        let workflow_id = workflow_id.into();
        let stage_status = registry
            .workflow()
            .stages
            .iter()
            .map(|s| (s.id.clone(), StageStatus::Pending))
            .collect();

        Self {
            workflow_id,
            registry,
            orchestrator,
            checkpoints,
            sink: Arc::new(NullEventSink),
            state: RwLock::new(ExecutionState::new()),
            stage_status: RwLock::new(stage_status),
            stage_findings: RwLock::new(HashMap::new()),
            stage_roles: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator<'a> {
        &self.orchestrator
    }

    /// The Checkpoint Manager this executor persists through, exposed so a
    /// driver (e.g. the CLI) can list or resume from checkpoints without
    /// reaching around the executor's own `restore` operation.
    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    /// A read-only snapshot of the single mutable [`ExecutionState`].
    pub fn state(&self) -> ExecutionState {
        self.state.read().clone()
    }

    pub fn status_of(&self, stage_id: &str) -> Option<StageStatus> {
        self.stage_status.read().get(stage_id).copied()
    }

    pub fn findings_of(&self, stage_id: &str) -> Vec<String> {
        self.stage_findings.read().get(stage_id).cloned().unwrap_or_default()
    }

    fn emit(&self, event: Event) {
        self.sink.emit(EventEnvelope {
            workflow_id: self.workflow_id.clone(),
            timestamp: stagecraft_core::now(),
            event,
        });
    }

    /// `start(stage_id, role_id?)`: validates preconditions
    /// (deps completed, stage Pending, role resolves), transitions to
    /// `InProgress`, runs the stage body via the Orchestrator, and applies
    /// `complete` to the result — this implementation runs start-through-
    /// complete as one synchronous step rather than splitting them across
    /// two externally-driven calls, since nothing in this workspace's single-
    /// process model needs the body to outlive the call that started it.
    pub async fn start(&self, stage_id: &str, role_id: Option<&str>) -> StagecraftResult<StageTransition> {
        let stage = self.get_stage(stage_id)?;
        self.check_preconditions(stage)?;

        let role = self.resolve_role(stage, role_id)?;
        self.stage_roles.write().insert(stage_id.to_string(), role.id.clone());

        self.enter_in_progress(stage_id, &role);

        let outcome = self.orchestrator.execute_stage(stage, &role).await;
        let transition = self.complete(stage_id, outcome).await?;
        Ok(transition)
    }

    /// `complete(stage_id)`: the Orchestrator body has returned;
    /// evaluate quality gates (unless the body surfaced a review marker or a
    /// fatal error first) and apply the resulting status.
    async fn complete(
        &self,
        stage_id: &str,
        body: StagecraftResult<StageOutcome>,
    ) -> StagecraftResult<StageTransition> {
        let stage = self.get_stage(stage_id)?.clone();

        let (status, findings) = match body {
            Err(e) => {
                warn!(stage = %stage_id, error = %e, "stage body failed, blocking stage");
                (StageStatus::Blocked, vec![e.to_string()])
            }
            Ok(outcome) if outcome.needs_review => (StageStatus::NeedsReview, Vec::new()),
            Ok(outcome) => self.evaluate_gates(&stage, &outcome.context.outputs),
        };

        self.apply_transition(stage_id, status, findings.clone());
        self.auto_checkpoint(None).await?;

        Ok(StageTransition {
            stage_id: stage_id.to_string(),
            status,
            findings,
        })
    }

    fn evaluate_gates(
        &self,
        stage: &Stage,
        outputs: &HashMap<String, serde_json::Value>,
    ) -> (StageStatus, Vec<String>) {
        let outcome = self.orchestrator.gate().evaluate(&stage.quality_gates, outputs);
        if outcome.pass {
            (StageStatus::Completed, Vec::new())
        } else {
            let findings: Vec<String> = outcome
                .findings
                .iter()
                .filter(|f| !f.pass)
                .map(|f| f.message.clone())
                .collect();
            for f in outcome.findings.iter().filter(|f| !f.pass && f.blocking) {
                self.emit(Event::GateFailed {
                    stage_id: stage.id.clone(),
                    gate_id: f.gate_id.clone(),
                    message: f.message.clone(),
                });
            }
            (StageStatus::Blocked, findings)
        }
    }

    fn apply_transition(&self, stage_id: &str, status: StageStatus, findings: Vec<String>) {
        self.stage_status.write().insert(stage_id.to_string(), status);
        self.stage_findings.write().insert(stage_id.to_string(), findings);

        let mut state = self.state.write();
        state.active_agents.remove(&format!("agent:{stage_id}"));

        match status {
            StageStatus::Completed => {
                if !state.completed_stages.iter().any(|s| s == stage_id) {
                    state.completed_stages.push(stage_id.to_string());
                }
                drop(state);
                info!(stage = %stage_id, "stage completed");
                self.emit(Event::StageCompleted { stage_id: stage_id.to_string() });
            }
            StageStatus::Blocked => {
                drop(state);
                let findings = self.stage_findings.read().get(stage_id).cloned().unwrap_or_default();
                warn!(stage = %stage_id, ?findings, "stage blocked");
                self.emit(Event::StageBlocked { stage_id: stage_id.to_string(), findings });
            }
            StageStatus::NeedsReview => {
                drop(state);
                info!(stage = %stage_id, "stage needs human review");
            }
            StageStatus::Pending | StageStatus::InProgress => drop(state),
        }
    }

    fn enter_in_progress(&self, stage_id: &str, role: &Role) {
        self.stage_status.write().insert(stage_id.to_string(), StageStatus::InProgress);
        let mut state = self.state.write();
        state.current_stage_id = Some(stage_id.to_string());
        state.current_role_id = Some(role.id.clone());
        state.active_agents.insert(format!("agent:{stage_id}"), role.id.clone());
    }

    /// `retry(stage_id)`: from `Blocked`, clear findings and
    /// re-run the stage with the role it last used.
    pub async fn retry(&self, stage_id: &str) -> StagecraftResult<StageTransition> {
        match self.status_of(stage_id) {
            Some(StageStatus::Blocked) => {}
            other => {
                return Err(StagecraftError::Internal(format!(
                    "retry('{stage_id}') requires status Blocked, found {other:?}"
                )))
            }
        }

        self.stage_findings.write().remove(stage_id);
        let role_id = self.stage_roles.read().get(stage_id).cloned();
        let stage = self.get_stage(stage_id)?;
        let role = match role_id.as_deref() {
            Some(id) => self.registry.get_role(id).cloned().ok_or_else(|| {
                StagecraftError::Internal(format!("role '{id}' used by stage '{stage_id}' vanished from registry"))
            })?,
            None => self.resolve_role(stage, None)?,
        };

        self.enter_in_progress(stage_id, &role);
        let outcome = self.orchestrator.execute_stage(stage, &role).await;
        self.complete(stage_id, outcome).await
    }

    /// `wfauto(goal?)`: repeatedly runs every currently
    /// startable stage (`Pending` with all `depends_on` `Completed`), using
    /// [`Orchestrator::execute_parallel_stages`] when more than one startable
    /// stage is marked `parallelizable`, until no stage can progress further
    /// or the workflow is cancelled.
    pub async fn wfauto(&self, goal: Option<&str>) -> StagecraftResult<Vec<StageTransition>> {
        let mut transitions = Vec::new();

        loop {
            if self.orchestrator.cancellation().is_cancelled() {
                return Err(StagecraftError::Cancelled);
            }

            let startable = self.startable_stages();
            if startable.is_empty() {
                break;
            }

            let parallel_batch: Vec<&Stage> =
                if startable.len() > 1 && startable.iter().all(|s| s.parallelizable) {
                    startable
                } else {
                    vec![startable[0]]
                };

            if parallel_batch.len() == 1 {
                let stage = parallel_batch[0];
                let role = self.resolve_role(stage, None)?;
                self.stage_roles.write().insert(stage.id.clone(), role.id.clone());
                self.enter_in_progress(&stage.id, &role);
                let outcome = self.orchestrator.execute_stage_with_goal(stage, &role, goal).await;
                transitions.push(self.complete(&stage.id, outcome).await?);
            } else {
                let mut roles = Vec::with_capacity(parallel_batch.len());
                for stage in &parallel_batch {
                    let role = self.resolve_role(stage, None)?;
                    self.stage_roles.write().insert(stage.id.clone(), role.id.clone());
                    self.enter_in_progress(&stage.id, &role);
                    roles.push(role);
                }
                let pairs: Vec<(&Stage, &Role)> =
                    parallel_batch.iter().zip(roles.iter()).map(|(s, r)| (*s, r)).collect();
                let outcomes = self.orchestrator.execute_parallel_stages(&pairs).await;
                for (stage, outcome) in parallel_batch.iter().zip(outcomes) {
                    transitions.push(self.complete(&stage.id, outcome).await?);
                }
            }

            self.auto_checkpoint(Some("wfauto".to_string())).await?;

            if transitions.last().is_some_and(|t| t.status != StageStatus::Completed) {
                break;
            }
        }

        Ok(transitions)
    }

    fn startable_stages(&self) -> Vec<&Stage> {
        let status = self.stage_status.read();
        self.registry
            .workflow()
            .stages
            .iter()
            .filter(|s| {
                status.get(&s.id) == Some(&StageStatus::Pending)
                    && s.depends_on.iter().all(|dep| status.get(dep) == Some(&StageStatus::Completed))
            })
            .collect()
    }

    fn get_stage(&self, stage_id: &str) -> StagecraftResult<&Stage> {
        self.registry.workflow().get_stage(stage_id).ok_or_else(|| {
            StagecraftError::Internal(format!("unknown stage '{stage_id}'"))
        })
    }

    fn check_preconditions(&self, stage: &Stage) -> StagecraftResult<()> {
        match self.status_of(&stage.id) {
            Some(StageStatus::Pending) => {}
            other => {
                return Err(StagecraftError::Internal(format!(
                    "start('{}') requires status Pending, found {other:?}",
                    stage.id
                )))
            }
        }
        let status = self.stage_status.read();
        for dep in &stage.depends_on {
            if status.get(dep) != Some(&StageStatus::Completed) {
                return Err(StagecraftError::Internal(format!(
                    "start('{}') blocked on incomplete dependency '{dep}'",
                    stage.id
                )));
            }
        }
        Ok(())
    }

    /// Resolves the role for a stage: explicit argument > stage default >
    /// inference by maximal `required_skills` overlap, tie-broken by role id.
    fn resolve_role(&self, stage: &Stage, explicit: Option<&str>) -> StagecraftResult<Role> {
        if let Some(id) = explicit {
            return self
                .registry
                .get_role(id)
                .cloned()
                .ok_or_else(|| StagecraftError::Internal(format!("unknown role '{id}'")));
        }
        if let Some(id) = &stage.role_id {
            return self
                .registry
                .get_role(id)
                .cloned()
                .ok_or_else(|| StagecraftError::Internal(format!("unknown role '{id}'")));
        }
        self.infer_role(stage)
            .cloned()
            .ok_or_else(|| StagecraftError::Internal(format!("no role could be inferred for stage '{}'", stage.id)))
    }

    fn infer_role(&self, stage: &Stage) -> Option<&Role> {
        let stage_skills: std::collections::HashSet<&str> =
            stage.required_skills.iter().map(|r| r.skill_id.as_str()).collect();

        let mut best: Option<(&Role, usize)> = None;
        let mut roles: Vec<&Role> = self.registry.roles().collect();
        roles.sort_by(|a, b| a.id.cmp(&b.id));
        for role in roles {
            let overlap = role
                .required_skills
                .iter()
                .filter(|r| stage_skills.contains(r.skill_id.as_str()))
                .count();
            let better = match best {
                None => true,
                Some((_, best_overlap)) => overlap > best_overlap,
            };
            if better {
                best = Some((role, overlap));
            }
        }
        best.map(|(r, _)| r)
    }

    /// Automatic checkpointing after every stage transition: the write lock
    /// on `state` is held only long enough to clone a snapshot, so this
    /// never blocks a concurrent stage body.
    async fn auto_checkpoint(&self, name: Option<String>) -> StagecraftResult<()> {
        let mut snapshot = self.state.read().clone();
        snapshot.tracker = self.orchestrator.tracker().snapshot();
        let descriptor = self.checkpoints.create(&snapshot, name.clone()).await?;
        self.state.write().checkpoints.push(descriptor.clone());
        self.emit(Event::CheckpointCreated {
            checkpoint_id: descriptor.id.to_string(),
            name,
        });
        Ok(())
    }

    /// Explicit checkpoint creation, available to callers beyond the
    /// automatic points.
    pub async fn checkpoint(&self, name: Option<String>) -> StagecraftResult<uuid::Uuid> {
        let mut snapshot = self.state.read().clone();
        snapshot.tracker = self.orchestrator.tracker().snapshot();
        let descriptor = self.checkpoints.create(&snapshot, name).await?;
        self.state.write().checkpoints.push(descriptor.clone());
        Ok(descriptor.id)
    }

    /// `restore(id)`: fully replaces the live
    /// [`ExecutionState`] and re-derives every stage's status from
    /// `completed_stages` — stages present there become `Completed`, every
    /// other stage reverts to `Pending` so `wfauto` can resume driving them.
    pub async fn restore(&self, checkpoint_id: uuid::Uuid) -> StagecraftResult<()> {
        let restored = self.checkpoints.restore(checkpoint_id).await?;

        let mut status = self.stage_status.write();
        for stage in &self.registry.workflow().stages {
            status.insert(
                stage.id.clone(),
                if restored.completed_stages.iter().any(|s| s == &stage.id) {
                    StageStatus::Completed
                } else {
                    StageStatus::Pending
                },
            );
        }
        drop(status);

        self.orchestrator.tracker().restore(restored.tracker.clone());
        *self.state.write() = restored;
        Ok(())
    }
}
