//! Best-skill-for-task selection.
//!
//! Scoring is a weighted sum of lexical affinity and historical success,
//! gated to zero by role authorization and role/skill constraint
//! compatibility. The affinity function here uses token overlap, which is
//! deterministic and keeps the ranking reproducible across runs; a stronger
//! embedding-based match could replace it without changing callers.

use stagecraft_core::{StagecraftError, StagecraftResult};
use stagecraft_registry::{Registry, Role, Skill};
use stagecraft_tracker::Tracker;
use std::collections::HashSet;
use tracing::{info, warn};

const WEIGHT_AFFINITY: f64 = 0.5;
const WEIGHT_HISTORY: f64 = 0.2;
const MODE_FIT_BOOST: f64 = 0.1;
const DEFAULT_HISTORY_SCORE: f64 = 0.5;

/// How many results the caller wants back from [`Selector::select`].
#[derive(Debug, Clone, Copy)]
pub enum SelectionMode {
    Single,
    TopN(usize),
}

/// A skill paired with its computed selection score.
#[derive(Debug, Clone)]
pub struct ScoredSkill {
    pub skill: Skill,
    pub score: f64,
}

/// The outcome of a selection, shaped by the requested [`SelectionMode`].
#[derive(Debug, Clone)]
pub enum Selection {
    Single(ScoredSkill),
    TopN(Vec<ScoredSkill>),
}

/// Picks the best skill for a task given role authorization, context, and
/// tracker history.
pub struct Selector<'a> {
    registry: &'a Registry,
    tracker: &'a Tracker,
}

impl<'a> Selector<'a> {
    pub fn new(registry: &'a Registry, tracker: &'a Tracker) -> Self {
        Self { registry, tracker }
    }

    /// `stage_mode` is the stage's declared execution mode (e.g.
    /// `"implementation"`, `"analysis"`), used for the mode-fit boost.
    pub fn select(
        &self,
        task_description: &str,
        role: &Role,
        stage_mode: Option<&str>,
        mode: SelectionMode,
    ) -> StagecraftResult<Selection> {
        let authorized: HashSet<&str> =
            role.required_skills.iter().map(|r| r.skill_id.as_str()).collect();
        let forbidden: HashSet<&str> =
            role.constraints.forbidden_actions.iter().map(String::as_str).collect();

        let task_tokens = tokenize(task_description);

        let mut scored: Vec<ScoredSkill> = self
            .registry
            .skills()
            .map(|skill| {
                let score = self.score_skill(skill, &task_tokens, &authorized, &forbidden, stage_mode);
                ScoredSkill {
                    skill: skill.clone(),
                    score,
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| min_level_for(role, &b.skill).cmp(&min_level_for(role, &a.skill)))
                .then_with(|| a.skill.id.cmp(&b.skill.id))
        });

        if scored.iter().all(|s| s.score <= 0.0) {
            warn!(task = %task_description, role = %role.id, "no skill available");
            return Err(StagecraftError::NoSkillAvailable(task_description.to_string()));
        }

        match mode {
            SelectionMode::Single => {
                let best = scored.into_iter().next().expect("scored is non-empty");
                info!(skill = %best.skill.id, score = best.score, "skill selected");
                Ok(Selection::Single(best))
            }
            SelectionMode::TopN(n) => {
                scored.truncate(n);
                Ok(Selection::TopN(scored))
            }
        }
    }

    fn score_skill(
        &self,
        skill: &Skill,
        task_tokens: &HashSet<String>,
        authorized: &HashSet<&str>,
        forbidden: &HashSet<&str>,
        stage_mode: Option<&str>,
    ) -> f64 {
        if !authorized.contains(skill.id.as_str()) {
            return 0.0;
        }
        if skill.execution_capabilities.iter().any(|c| forbidden.contains(c.as_str())) {
            return 0.0;
        }

        let affinity = lexical_affinity(task_tokens, skill);
        let history = self.tracker.score_of(&skill.id).unwrap_or(DEFAULT_HISTORY_SCORE);
        let mode_boost = match (skill.metadata.execution_mode.as_deref(), stage_mode) {
            (Some(skill_mode), Some(stage_mode)) if skill_mode == stage_mode => MODE_FIT_BOOST,
            _ => 0.0,
        };

        WEIGHT_AFFINITY * affinity + WEIGHT_HISTORY * history + mode_boost
    }
}

fn min_level_for(role: &Role, skill: &Skill) -> u8 {
    role.required_skills
        .iter()
        .find(|r| r.skill_id == skill.id)
        .map(|r| r.min_level)
        .unwrap_or(0)
}

fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
        .filter(|w| !w.is_empty())
        .collect()
}

/// Token-overlap affinity between the task description and the skill's
/// name, description, and dimension tags, normalized to `[0, 1]`.
fn lexical_affinity(task_tokens: &HashSet<String>, skill: &Skill) -> f64 {
    if task_tokens.is_empty() {
        return 0.0;
    }
    let mut skill_tokens = tokenize(&skill.name);
    skill_tokens.extend(tokenize(&skill.description));
    for dim in &skill.dimensions {
        skill_tokens.extend(tokenize(dim));
    }
    if skill_tokens.is_empty() {
        return 0.0;
    }
    let overlap = task_tokens.intersection(&skill_tokens).count();
    overlap as f64 / task_tokens.len() as f64
}
