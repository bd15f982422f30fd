//! Goal → [`TaskDecomposition`]: a keyword-driven mapping over the registry's
//! `Workflow` stages for the always-available rule strategy, with an LLM
//! strategy tried first when a client is configured.

use crate::task::{Task, TaskDecomposition, TaskStatus};
use serde::Deserialize;
use stagecraft_core::{EntityId, StagecraftError, StagecraftResult};
use stagecraft_llm::{LlmClient, LlmOptions};
use stagecraft_registry::Registry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

struct DraftTask {
    id: Uuid,
    description: String,
    depends_on: Vec<Uuid>,
}

/// Decomposes a goal into a [`TaskDecomposition`]. Tries the LLM strategy
/// first when a client is configured; always falls back to the rule
/// strategy, which never fails.
pub struct Decomposer<'a> {
    registry: &'a Registry,
    llm: Option<Arc<dyn LlmClient>>,
    default_role: EntityId,
}

impl<'a> Decomposer<'a> {
    pub fn new(registry: &'a Registry, default_role: impl Into<EntityId>) -> Self {
        Self {
            registry,
            llm: None,
            default_role: default_role.into(),
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub async fn decompose(&self, goal: &str) -> StagecraftResult<TaskDecomposition> {
        let drafts = match &self.llm {
            Some(client) => match self.decompose_with_llm(client.as_ref(), goal).await {
                Ok(drafts) if !drafts.is_empty() => drafts,
                Ok(_) => {
                    warn!("llm decomposition returned no tasks, falling back to rule strategy");
                    self.decompose_with_rules(goal)
                }
                Err(e) => {
                    warn!(error = %e, "llm decomposition failed, falling back to rule strategy");
                    self.decompose_with_rules(goal)
                }
            },
            None => self.decompose_with_rules(goal),
        };

        self.post_process(drafts)
    }

    async fn decompose_with_llm(&self, client: &dyn LlmClient, goal: &str) -> StagecraftResult<Vec<DraftTask>> {
        let roles: Vec<&str> = self.registry.roles().map(|r| r.id.as_str()).collect();
        let prompt = format!(
            "Goal: {goal}\nAvailable roles: {roles:?}\n\n\
             Decompose the goal into a JSON array of tasks: \
             [{{\"description\": string, \"depends_on\": [int]}}, ...], \
             where `depends_on` are 0-based indices into this same array."
        );
        let response = client.complete(&prompt, &LlmOptions::default()).await?;
        parse_llm_drafts(&response)
            .ok_or_else(|| StagecraftError::Execution("unparseable task decomposition response".to_string()))
    }

    /// Maps phrases in `goal` to stages of the registry's workflow; each
    /// matched stage yields one task with dependency edges inherited from
    /// the stage's own `depends_on`. Always succeeds — an empty or
    /// unmatched goal still yields one task per stage, so this is a true
    /// fallback.
    fn decompose_with_rules(&self, goal: &str) -> Vec<DraftTask> {
        let workflow = self.registry.workflow();
        let goal_tokens = tokenize(goal);

        let matched: Vec<&stagecraft_registry::Stage> = workflow
            .stages
            .iter()
            .filter(|stage| !goal_tokens.is_empty() && !tokenize(&stage.name).is_disjoint(&goal_tokens))
            .collect();
        let selected: Vec<&stagecraft_registry::Stage> =
            if matched.is_empty() { workflow.stages.iter().collect() } else { matched };

        let stage_to_task: HashMap<&str, Uuid> =
            selected.iter().map(|s| (s.id.as_str(), stagecraft_core::new_id())).collect();

        selected
            .iter()
            .map(|stage| {
                let id = stage_to_task[stage.id.as_str()];
                let depends_on = stage
                    .depends_on
                    .iter()
                    .filter_map(|dep| stage_to_task.get(dep.as_str()).copied())
                    .collect();
                DraftTask {
                    id,
                    description: format!("{}: {goal}", stage.name),
                    depends_on,
                }
            })
            .collect()
    }

    fn post_process(&self, drafts: Vec<DraftTask>) -> StagecraftResult<TaskDecomposition> {
        let tasks: Vec<Task> = drafts
            .into_iter()
            .map(|draft| Task {
                id: draft.id,
                role_id: self.assign_role(&draft.description),
                description: draft.description,
                depends_on: draft.depends_on,
                status: TaskStatus::Pending,
                inputs: HashMap::new(),
                outputs: HashMap::new(),
                error: None,
                created_at: stagecraft_core::now(),
                parent_task: None,
                depth: 0,
            })
            .collect();

        let dependency_graph: HashMap<Uuid, Vec<Uuid>> =
            tasks.iter().map(|t| (t.id, t.depends_on.clone())).collect();

        let execution_order = topological_groups(&tasks)?;

        info!(tasks = tasks.len(), groups = execution_order.len(), "goal decomposed");
        Ok(TaskDecomposition { tasks, execution_order, dependency_graph })
    }

    /// Assigns a role by matching the task description's tokens against the
    /// union of each role's required skills' name/description/dimensions,
    /// falling back to `default_role` when no role has any overlap.
    fn assign_role(&self, description: &str) -> EntityId {
        let desc_tokens = tokenize(description);
        let mut best: Option<(&str, usize)> = None;

        for role in self.registry.roles() {
            let mut skill_tokens: HashSet<String> = HashSet::new();
            for req in &role.required_skills {
                if let Some(skill) = self.registry.get_skill(&req.skill_id) {
                    skill_tokens.extend(tokenize(&skill.name));
                    skill_tokens.extend(tokenize(&skill.description));
                    for dim in &skill.dimensions {
                        skill_tokens.extend(tokenize(dim));
                    }
                }
            }
            let overlap = desc_tokens.intersection(&skill_tokens).count();
            let improves = match best {
                None => true,
                Some((_, best_overlap)) => overlap > best_overlap,
            };
            if overlap > 0 && improves {
                best = Some((role.id.as_str(), overlap));
            }
        }

        best.map(|(id, _)| id.to_string()).unwrap_or_else(|| self.default_role.clone())
    }
}

/// Groups task ids into dependency-respecting layers via Kahn's algorithm;
/// rejects a cycle with `CyclicDecomposition` naming one stuck task.
fn topological_groups(tasks: &[Task]) -> StagecraftResult<Vec<Vec<Uuid>>> {
    let mut indegree: HashMap<Uuid, usize> = tasks.iter().map(|t| (t.id, t.depends_on.len())).collect();
    let mut dependents: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for t in tasks {
        for dep in &t.depends_on {
            dependents.entry(*dep).or_default().push(t.id);
        }
    }

    let mut processed: HashSet<Uuid> = HashSet::new();
    let mut groups: Vec<Vec<Uuid>> = Vec::new();

    loop {
        let mut ready: Vec<Uuid> = indegree
            .iter()
            .filter(|(id, &d)| d == 0 && !processed.contains(*id))
            .map(|(id, _)| *id)
            .collect();
        if ready.is_empty() {
            break;
        }
        ready.sort();
        for id in &ready {
            processed.insert(*id);
            if let Some(deps) = dependents.get(id) {
                for d in deps {
                    if let Some(v) = indegree.get_mut(d) {
                        *v = v.saturating_sub(1);
                    }
                }
            }
        }
        groups.push(ready);
    }

    if processed.len() != tasks.len() {
        let stuck = tasks
            .iter()
            .find(|t| !processed.contains(&t.id))
            .expect("processed.len() != tasks.len() implies an unprocessed task exists");
        return Err(StagecraftError::CyclicDecomposition(stuck.description.clone()));
    }

    Ok(groups)
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

#[derive(Deserialize)]
struct RawLlmTask {
    description: String,
    #[serde(default)]
    depends_on: Vec<usize>,
}

fn parse_llm_drafts(response: &str) -> Option<Vec<DraftTask>> {
    let raw: Vec<RawLlmTask> = serde_json::from_str(response).ok()?;
    if raw.is_empty() {
        return None;
    }
    let ids: Vec<Uuid> = raw.iter().map(|_| stagecraft_core::new_id()).collect();
    Some(
        raw.iter()
            .enumerate()
            .map(|(i, r)| DraftTask {
                id: ids[i],
                description: r.description.clone(),
                depends_on: r.depends_on.iter().filter_map(|&idx| ids.get(idx).copied()).collect(),
            })
            .collect(),
    )
}
