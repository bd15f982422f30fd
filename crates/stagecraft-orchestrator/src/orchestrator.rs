//! The central scheduler: the only component that actually drives
//! Selector → Invoker → Tracker → Bus → Gate for a running workflow, over
//! the registry-driven stage/task model this workspace uses throughout.

use serde_json::Value;
use stagecraft_agent::{Agent, AgentContext, Intent};
use stagecraft_bus::SharedBus;
use stagecraft_core::{digest_of, CancellationToken, EntityId, StagecraftError, StagecraftResult};
use stagecraft_gate::GateEvaluator;
use stagecraft_invoker::{dispatch, DispatchContext, InvokerBackend};
use stagecraft_llm::LlmClient;
use stagecraft_registry::{Registry, Role, Stage};
use stagecraft_selector::{Selection, SelectionMode, Selector};
use stagecraft_tracker::Tracker;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::events::{Event, EventEnvelope, EventSink, NullEventSink};
use crate::monitor::AgentMonitor;
use crate::queue::TaskQueue;
use crate::review::detect_review_markers;

/// The outcome of running one stage or task group: the accumulated
/// [`AgentContext`] plus whether a reviewer-style marker was seen in its
/// output, triggering human-in-the-loop escalation.
pub struct StageOutcome {
    pub context: AgentContext,
    pub needs_review: bool,
}

/// Everything the Orchestrator needs to run stages and tasks against one
/// loaded [`Registry`]. Borrows the Registry and Tracker for the duration of
/// a run; owns its own handles to the Bus, Invoker backend, Gate Evaluator,
/// and the ambient per-role monitor.
pub struct Orchestrator<'a> {
    workflow_id: EntityId,
    registry: &'a Registry,
    tracker: &'a Tracker,
    bus: SharedBus,
    backend: Arc<dyn InvokerBackend>,
    gate: GateEvaluator,
    monitor: Arc<AgentMonitor>,
    sink: Arc<dyn EventSink>,
    llm: Option<Arc<dyn LlmClient>>,
    cancellation: CancellationToken,
    /// Reuse cache keyed by output digest, populated on every successful
    /// dispatch and consulted by the idempotent-reuse check. The Tracker
    /// only stores digests, not values, so this is the Orchestrator's own
    /// side-table — never persisted, never consulted across process
    /// restarts.
    output_cache: parking_lot::RwLock<HashMap<String, Value>>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(workflow_id: impl Into<EntityId>, registry: &'a Registry, tracker: &'a Tracker, bus: SharedBus, backend: Arc<dyn InvokerBackend>, gate: GateEvaluator) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            registry,
            tracker,
            bus,
            backend,
            gate,
            monitor: Arc::new(AgentMonitor::new()),
            sink: Arc::new(NullEventSink),
            llm: None,
            cancellation: CancellationToken::new(),
            output_cache: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_monitor(mut self, monitor: Arc<AgentMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// The Quality Gate Evaluator threaded through at construction, used by
    /// the Workflow Executor on stage completion.
    pub fn gate(&self) -> &GateEvaluator {
        &self.gate
    }

    /// The Tracker this orchestrator runs against, used by the Workflow
    /// Executor to restore the append log from a checkpoint.
    pub fn tracker(&self) -> &Tracker {
        self.tracker
    }

    fn emit(&self, event: Event) {
        self.sink.emit(EventEnvelope {
            workflow_id: self.workflow_id.clone(),
            timestamp: stagecraft_core::now(),
            event,
        });
    }

    fn make_agent(&self, agent_id: impl Into<EntityId>, role: &Role) -> Agent {
        let mut agent = Agent::new(agent_id, role.clone(), Arc::clone(&self.bus));
        if let Some(llm) = &self.llm {
            agent = agent.with_llm(Arc::clone(llm));
        }
        agent
    }

    /// Runs a single stage with a single agent: prepares
    /// intents, executes each in order through the hot loop, and returns the
    /// accumulated context. Never touches gates or stage status — that is
    /// the Workflow Executor's job.
    pub async fn execute_stage(&self, stage: &Stage, role: &Role) -> StagecraftResult<StageOutcome> {
        self.execute_stage_with_goal(stage, role, None).await
    }

    /// As [`Self::execute_stage`], but lets the caller override the goal text
    /// handed to the stage's agent — used by `wfauto(goal)` to drive every
    /// stage from one overarching goal instead of each stage's own name.
    pub async fn execute_stage_with_goal(
        &self,
        stage: &Stage,
        role: &Role,
        goal_override: Option<&str>,
    ) -> StagecraftResult<StageOutcome> {
        self.emit(Event::StageStarted {
            stage_id: stage.id.clone(),
            role_id: Some(role.id.clone()),
        });
        info!(stage = %stage.id, role = %role.id, "stage started");

        let agent = self.make_agent(format!("agent:{}", stage.id), role);
        self.monitor.start_task(&role.id, Uuid::nil()).await;

        let goal = goal_override.unwrap_or(&stage.name);
        let result = self.run_goal(&agent, role, &stage.id, goal, stage.outputs.as_slice()).await;

        self.monitor.finish_task(&role.id).await;
        if result.is_err() {
            self.monitor.record_error(&role.id).await;
        }
        result
    }

    /// `execute_parallel_stages`: runs every stage in `stages`
    /// concurrently and awaits the whole partition. A failing stage never
    /// cancels its siblings — results are collected and returned as a
    /// `Vec` aligned with the input order, `Err` entries included.
    pub async fn execute_parallel_stages(
        &self,
        stages: &[(&Stage, &Role)],
    ) -> Vec<StagecraftResult<StageOutcome>> {
        let futures = stages.iter().map(|(stage, role)| self.execute_stage(stage, role));
        futures_util::future::join_all(futures).await
    }

    /// `execute_with_collaboration`: decomposes `goal`, then runs
    /// every `execution_order` group as a set of concurrently-cooperating
    /// tasks wired into the shared Bus, advancing group by group. Returns the
    /// task queue so the caller can inspect per-task outcomes.
    pub async fn execute_with_collaboration(
        &self,
        decomposition: &stagecraft_decompose::TaskDecomposition,
    ) -> StagecraftResult<TaskQueue> {
        let mut queue = TaskQueue::new();
        for task in &decomposition.tasks {
            self.emit(Event::TaskCreated {
                task_id: task.id.to_string(),
                role_id: task.role_id.clone(),
            });
            queue.add(task.clone());
        }

        for group in &decomposition.execution_order {
            if self.cancellation.is_cancelled() {
                return Err(StagecraftError::Cancelled);
            }

            let mut futures = Vec::with_capacity(group.len());
            for task_id in group {
                let task_id = *task_id;
                let Some(task) = queue.get(task_id).cloned() else {
                    continue;
                };
                let Some(role) = self.registry.get_role(&task.role_id) else {
                    queue.mark_failed(task_id, format!("unknown role '{}'", task.role_id));
                    continue;
                };
                queue.mark_running(task_id);

                let agent = self.make_agent(format!("task:{task_id}"), role);
                futures.push(async move {
                    self.monitor.start_task(&role.id, task_id).await;
                    let outcome = self.run_goal(&agent, role, &task_id.to_string(), &task.description, &[]).await;
                    self.monitor.finish_task(&role.id).await;
                    (task_id, outcome)
                });
            }

            let handles = futures_util::future::join_all(futures).await;

            for (task_id, outcome) in handles {
                match outcome {
                    Ok(stage_outcome) if stage_outcome.needs_review => {
                        queue.mark_needs_review(task_id);
                        self.monitor.waiting_for_approval(
                            &queue.get(task_id).map(|t| t.role_id.clone()).unwrap_or_default(),
                        ).await;
                    }
                    Ok(_) => {
                        queue.mark_completed(task_id);
                        self.emit(Event::TaskCompleted { task_id: task_id.to_string() });
                    }
                    Err(e) => {
                        error!(task = %task_id, error = %e, "task failed");
                        queue.mark_failed(task_id, e.to_string());
                        self.monitor.record_error(
                            &queue.get(task_id).map(|t| t.role_id.clone()).unwrap_or_default(),
                        ).await;
                    }
                }
            }
        }

        Ok(queue)
    }

    /// The per-task/per-stage hot loop: `prepare` → intents, then dispatch
    /// each intent in order, merging
    /// outputs into the returned [`AgentContext`] and, for names the caller
    /// declares via `shared_outputs`, into the Bus shared context.
    async fn run_goal(
        &self,
        agent: &Agent,
        role: &Role,
        owner_id: &str,
        goal: &str,
        shared_outputs: &[String],
    ) -> StagecraftResult<StageOutcome> {
        let (mut ctx, intents) = agent.prepare(goal, HashMap::new()).await?;
        let mut needs_review = false;

        for intent in &intents {
            if self.cancellation.is_cancelled() {
                return Err(StagecraftError::Cancelled);
            }
            self.execute_intent(role, owner_id, intent, &mut ctx, shared_outputs).await?;
        }

        if detect_review_markers(&ctx.outputs) {
            needs_review = true;
        }

        Ok(StageOutcome { context: ctx, needs_review })
    }

    async fn execute_intent(
        &self,
        role: &Role,
        owner_id: &str,
        intent: &Intent,
        ctx: &mut AgentContext,
        shared_outputs: &[String],
    ) -> StagecraftResult<()> {
        let selector = Selector::new(self.registry, self.tracker);

        let skill = match selector.select(&intent.description, role, None, SelectionMode::Single) {
            Ok(Selection::Single(scored)) => scored.skill,
            Ok(Selection::TopN(_)) => unreachable!("SelectionMode::Single always returns Selection::Single"),
            Err(StagecraftError::NoSkillAvailable(_)) if !intent.focus.is_empty() => {
                let broadened = format!("{} {}", intent.description, intent.focus.join(" "));
                warn!(intent = %intent.description, "no skill available, re-prompting with broadened description");
                match selector.select(&broadened, role, None, SelectionMode::Single)? {
                    Selection::Single(scored) => scored.skill,
                    Selection::TopN(_) => unreachable!("SelectionMode::Single always returns Selection::Single"),
                }
            }
            Err(e) => return Err(e),
        };

        let input = serde_json::json!({
            "description": intent.description,
            "focus": intent.focus,
            "context": ctx.shared_context,
            "outputs": ctx.outputs,
        });
        let input_digest = digest_of(&input);

        self.emit(Event::SkillInvoked { skill_id: skill.id.clone(), owner_id: owner_id.to_string() });

        let reused = if skill.deterministic && skill.side_effects.is_empty() {
            self.tracker
                .find_reusable(&skill.id, owner_id, &input_digest)
                .and_then(|exec| exec.output_digest)
                .and_then(|digest| self.output_cache.read().get(&digest).cloned())
        } else {
            None
        };

        let output = if let Some(cached) = reused {
            info!(skill = %skill.id, owner = %owner_id, "reusing prior deterministic output");
            cached
        } else {
            let shared_context_value = serde_json::to_value(&ctx.shared_context)
                .unwrap_or(Value::Object(Default::default()));
            let outcome = dispatch(
                self.backend.as_ref(),
                &skill,
                input,
                &shared_context_value,
                DispatchContext {
                    owner_id,
                    role_id: &role.id,
                    cancellation: &self.cancellation,
                },
                self.tracker,
            )
            .await;

            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.emit(Event::SkillCompleted {
                        skill_id: skill.id.clone(),
                        owner_id: owner_id.to_string(),
                        success: false,
                    });
                    return Err(e);
                }
            };

            self.emit(Event::SkillCompleted {
                skill_id: skill.id.clone(),
                owner_id: owner_id.to_string(),
                success: true,
            });
            let digest = digest_of(&outcome.output);
            self.output_cache.write().insert(digest, outcome.output.clone());
            ctx.history.push(outcome.execution.id);
            outcome.output
        };

        merge_output(ctx, &output, &skill.id, shared_outputs, &self.bus, owner_id);
        Ok(())
    }
}

/// Merges a dispatched skill's output into the agent's accumulated
/// `outputs` and, for any artifact name the caller declares shared, into the
/// Bus shared-context map.
fn merge_output(
    ctx: &mut AgentContext,
    output: &Value,
    skill_id: &str,
    shared_outputs: &[String],
    bus: &SharedBus,
    owner_id: &str,
) {
    match output {
        Value::Object(map) => {
            for (key, value) in map {
                ctx.outputs.insert(key.clone(), value.clone());
                if shared_outputs.iter().any(|name| name == key) {
                    bus.share_context(owner_id, key.clone(), value.clone());
                }
            }
        }
        other => {
            ctx.outputs.insert(skill_id.to_string(), other.clone());
            if shared_outputs.iter().any(|name| name == skill_id) {
                bus.share_context(owner_id, skill_id.to_string(), other.clone());
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stagecraft_bus::Bus;
    use stagecraft_gate::GateEvaluator;
    use stagecraft_invoker::{InvocationRequest, PlaceholderInvoker};
    use stagecraft_registry::{
        BundleMember, RegistryConfig, RoleConstraints, RoleDef, SkillBundle, SkillRequirement, SkillType,
        Workflow,
    };

    fn skill(id: &str) -> stagecraft_registry::Skill {
        stagecraft_registry::Skill {
            id: id.into(),
            name: id.into(),
            description: format!("does {id} things"),
            dimensions: vec![],
            levels: [(1, "basic".to_string())].into_iter().collect(),
            tools: vec![],
            constraints: vec![],
            input_schema: None,
            output_schema: Some(serde_json::json!({
                "type": "object",
                "required": ["result"],
                "properties": {"result": {"type": "string"}}
            })),
            metadata: Default::default(),
            skill_type: SkillType::Procedural,
            deterministic: true,
            testable: true,
            side_effects: vec![],
            execution_capabilities: vec![],
        }
    }

    fn registry_with_one_stage() -> Registry {
        let role = RoleDef {
            id: "builder".into(),
            name: "Builder".into(),
            description: "builds things".into(),
            required_skills: vec![SkillRequirement { skill_id: "s1".into(), min_level: 1, focus: vec![] }],
            extends: vec![],
            constraints: RoleConstraints::default(),
            validation_rules: vec![],
        };
        let workflow = Workflow {
            id: "wf".into(),
            name: "wf".into(),
            stages: vec![stagecraft_registry::Stage {
                id: "stg".into(),
                name: "build things".into(),
                role_id: Some("builder".into()),
                required_skills: vec![],
                inputs: vec![],
                outputs: vec!["result".into()],
                depends_on: vec![],
                quality_gates: vec![],
                parallelizable: false,
            }],
        };
        let config = RegistryConfig {
            skills: vec![skill("s1")],
            bundles: vec![],
            roles: vec![role],
            workflow,
            registered_predicates: vec![],
        };
        Registry::load(config).expect("valid registry")
    }

    #[tokio::test]
    async fn execute_stage_produces_output_and_shares_it() {
        let registry = registry_with_one_stage();
        let tracker = Tracker::new();
        let bus: SharedBus = Arc::new(Bus::new());
        let backend = Arc::new(PlaceholderInvoker);
        let gate = GateEvaluator::new();
        let orchestrator = Orchestrator::new("wf", &registry, &tracker, Arc::clone(&bus), backend, gate);

        let stage = registry.workflow().get_stage("stg").expect("stage");
        let role = registry.get_role("builder").expect("role");
        let outcome = orchestrator.execute_stage(stage, role).await.expect("stage runs");

        assert!(outcome.context.outputs.contains_key("result"));
        assert!(bus.get_context("result").is_some());
        assert!(!outcome.needs_review);
    }

    #[tokio::test]
    async fn reused_deterministic_output_skips_second_dispatch() {
        struct CountingInvoker {
            calls: std::sync::atomic::AtomicUsize,
        }
        #[async_trait]
        impl InvokerBackend for CountingInvoker {
            fn supports(&self, _skill: &stagecraft_registry::Skill) -> bool {
                true
            }
            async fn execute(&self, _request: InvocationRequest<'_>) -> StagecraftResult<Value> {
                self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(serde_json::json!({"result": "same every time"}))
            }
        }

        let registry = registry_with_one_stage();
        let tracker = Tracker::new();
        let bus: SharedBus = Arc::new(Bus::new());
        let backend = Arc::new(CountingInvoker { calls: std::sync::atomic::AtomicUsize::new(0) });
        let gate = GateEvaluator::new();
        let orchestrator =
            Orchestrator::new("wf", &registry, &tracker, Arc::clone(&bus), Arc::clone(&backend) as Arc<dyn InvokerBackend>, gate);

        let stage = registry.workflow().get_stage("stg").expect("stage");
        let role = registry.get_role("builder").expect("role");

        orchestrator.execute_stage(stage, role).await.expect("first run");
        orchestrator.execute_stage(stage, role).await.expect("second run");

        // Same owner id ("agent:stg" task-equivalent uses the stage id as
        // owner), same intent text (rule-based splitting of the same stage
        // name is deterministic), so the second run should reuse the first
        // run's output rather than invoking the backend again.
        assert_eq!(backend.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
