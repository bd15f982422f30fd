use crate::model::{
    BundleMember, GateKind, Role, RoleDef, Skill, SkillBundle, SkillRequirement, Workflow,
};
use std::collections::{HashMap, HashSet};
use stagecraft_core::{ConfigError, EntityId, StagecraftResult};
use tracing::info;

/// Validated, immutable in-memory store of roles, skills, bundles, and the
/// workflow.
///
/// `Registry::load` is total: any validation failure rejects the whole
/// config, so every downstream component can assume every reference resolves.
pub struct Registry {
    skills: HashMap<EntityId, Skill>,
    roles: HashMap<EntityId, Role>,
    workflow: Workflow,
    registered_predicates: HashSet<String>,
}

impl Registry {
    /// Validate and load a [`crate::model::RegistryConfig`] into a `Registry`.
    pub fn load(config: crate::model::RegistryConfig) -> StagecraftResult<Self> {
        let skills = index_skills(&config.skills)?;
        let bundles = index_bundles(&config.bundles)?;

        for bundle in config.bundles.iter() {
            expand_bundle(&bundle.id, &bundles, &mut HashSet::new(), &mut HashSet::new())?;
        }

        let mut role_defs = HashMap::new();
        for r in &config.roles {
            if role_defs.insert(r.id.clone(), r.clone()).is_some() {
                return Err(ConfigError::DuplicateId {
                    kind: "role".into(),
                    id: r.id.clone(),
                }
                .into());
            }
        }

        let mut roles = HashMap::new();
        for r in &config.roles {
            let role = expand_role(r, &role_defs, &bundles, &skills, &mut HashSet::new())?;
            validate_role_constraints(&role)?;
            roles.insert(role.id.clone(), role);
        }

        validate_workflow(&config.workflow, &roles, &skills, &config.registered_predicates)?;

        info!(
            skills = skills.len(),
            roles = roles.len(),
            stages = config.workflow.stages.len(),
            "registry loaded"
        );

        Ok(Self {
            skills,
            roles,
            workflow: config.workflow,
            registered_predicates: config.registered_predicates.into_iter().collect(),
        })
    }

    pub fn get_role(&self, id: &str) -> Option<&Role> {
        self.roles.get(id)
    }

    pub fn get_skill(&self, id: &str) -> Option<&Skill> {
        self.skills.get(id)
    }

    /// The post-expansion skill requirements authorized for a role, with
    /// `min_level` already reduced to the max across duplicate references.
    pub fn skills_for_role(&self, role_id: &str) -> Vec<&SkillRequirement> {
        match self.roles.get(role_id) {
            Some(role) => role.required_skills.iter().collect(),
            None => Vec::new(),
        }
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    pub fn skills(&self) -> impl Iterator<Item = &Skill> {
        self.skills.values()
    }

    pub fn predicate_is_registered(&self, id: &str) -> bool {
        self.registered_predicates.contains(id)
    }
}

fn index_skills(skills: &[Skill]) -> StagecraftResult<HashMap<EntityId, Skill>> {
    let mut out = HashMap::new();
    for s in skills {
        for level in s.levels.keys() {
            if !(1..=3).contains(level) {
                return Err(ConfigError::LevelOutOfRange {
                    skill_id: s.id.clone(),
                    level: i64::from(*level),
                }
                .into());
            }
        }
        if out.insert(s.id.clone(), s.clone()).is_some() {
            return Err(ConfigError::DuplicateId {
                kind: "skill".into(),
                id: s.id.clone(),
            }
            .into());
        }
    }
    Ok(out)
}

fn index_bundles(bundles: &[SkillBundle]) -> StagecraftResult<HashMap<EntityId, SkillBundle>> {
    let mut out = HashMap::new();
    for b in bundles {
        if out.insert(b.id.clone(), b.clone()).is_some() {
            return Err(ConfigError::DuplicateId {
                kind: "bundle".into(),
                id: b.id.clone(),
            }
            .into());
        }
    }
    Ok(out)
}

/// Recursively expand a bundle into its flattened `SkillRequirement` list,
/// detecting cycles via the `visiting` set.
fn expand_bundle(
    bundle_id: &str,
    bundles: &HashMap<EntityId, SkillBundle>,
    visiting: &mut HashSet<EntityId>,
    seen: &mut HashSet<EntityId>,
) -> StagecraftResult<Vec<SkillRequirement>> {
    if !visiting.insert(bundle_id.to_string()) {
        return Err(ConfigError::BundleCycle(bundle_id.to_string()).into());
    }
    seen.insert(bundle_id.to_string());

    let bundle = bundles.get(bundle_id).ok_or_else(|| ConfigError::MissingRef {
        kind: "bundle".into(),
        id: bundle_id.to_string(),
        referenced_by: "skill bundle expansion".into(),
    })?;

    let mut out = Vec::new();
    for member in &bundle.requirements {
        match member {
            BundleMember::Skill(req) => out.push(req.clone()),
            BundleMember::Bundle { bundle_id: nested } => {
                out.extend(expand_bundle(nested, bundles, visiting, seen)?);
            }
        }
    }
    visiting.remove(bundle_id);
    Ok(out)
}

/// Expand a role's `required_skills` across bundle references and `extends`
/// composition, merging duplicate `skill_id`s to their max `min_level`.
fn expand_role(
    role: &RoleDef,
    role_defs: &HashMap<EntityId, RoleDef>,
    bundles: &HashMap<EntityId, SkillBundle>,
    skills: &HashMap<EntityId, Skill>,
    visiting: &mut HashSet<EntityId>,
) -> StagecraftResult<Role> {
    if !visiting.insert(role.id.clone()) {
        return Err(ConfigError::BundleCycle(format!("role extends cycle at '{}'", role.id)).into());
    }

    let mut merged: HashMap<EntityId, SkillRequirement> = HashMap::new();

    for parent_id in &role.extends {
        let parent_def = role_defs.get(parent_id).ok_or_else(|| ConfigError::MissingRef {
            kind: "role".into(),
            id: parent_id.clone(),
            referenced_by: format!("role '{}' extends", role.id),
        })?;
        let parent = expand_role(parent_def, role_defs, bundles, skills, visiting)?;
        for req in parent.required_skills {
            merge_requirement(&mut merged, req);
        }
    }

    for req in &role.required_skills {
        // A requirement whose `skill_id` resolves to a bundle id expands
        // transitively; otherwise it is taken as a concrete skill reference.
        if skills.contains_key(&req.skill_id) {
            merge_requirement(&mut merged, req.clone());
        } else if bundles.contains_key(&req.skill_id) {
            let expanded = expand_bundle(&req.skill_id, bundles, &mut HashSet::new(), &mut HashSet::new())?;
            for mut sub in expanded {
                sub.min_level = sub.min_level.max(req.min_level);
                merge_requirement(&mut merged, sub);
            }
        } else {
            return Err(ConfigError::MissingRef {
                kind: "skill".into(),
                id: req.skill_id.clone(),
                referenced_by: format!("role '{}'", role.id),
            }
            .into());
        }
    }

    for req in merged.values() {
        if !(1..=3).contains(&req.min_level) {
            return Err(ConfigError::LevelOutOfRange {
                skill_id: req.skill_id.clone(),
                level: i64::from(req.min_level),
            }
            .into());
        }
    }

    visiting.remove(&role.id);

    let mut required_skills: Vec<SkillRequirement> = merged.into_values().collect();
    required_skills.sort_by(|a, b| a.skill_id.cmp(&b.skill_id));

    Ok(Role {
        id: role.id.clone(),
        name: role.name.clone(),
        description: role.description.clone(),
        required_skills,
        constraints: role.constraints.clone(),
        validation_rules: role.validation_rules.clone(),
    })
}

fn merge_requirement(merged: &mut HashMap<EntityId, SkillRequirement>, req: SkillRequirement) {
    merged
        .entry(req.skill_id.clone())
        .and_modify(|existing| {
            existing.min_level = existing.min_level.max(req.min_level);
            for tag in &req.focus {
                if !existing.focus.contains(tag) {
                    existing.focus.push(tag.clone());
                }
            }
        })
        .or_insert(req);
}

fn validate_role_constraints(role: &Role) -> StagecraftResult<()> {
    let allowed: HashSet<&str> = role.constraints.allowed_actions.iter().map(String::as_str).collect();
    let forbidden: HashSet<&str> = role.constraints.forbidden_actions.iter().map(String::as_str).collect();
    let overlap: Vec<String> = allowed.intersection(&forbidden).map(|s| (*s).to_string()).collect();
    if !overlap.is_empty() {
        return Err(ConfigError::ForbiddenAllowedOverlap {
            role_id: role.id.clone(),
            overlap,
        }
        .into());
    }
    Ok(())
}

fn validate_workflow(
    workflow: &Workflow,
    roles: &HashMap<EntityId, Role>,
    skills: &HashMap<EntityId, Skill>,
    registered_predicates: &[String],
) -> StagecraftResult<()> {
    let mut seen_stage_ids = HashSet::new();
    for stage in &workflow.stages {
        if !seen_stage_ids.insert(stage.id.clone()) {
            return Err(ConfigError::DuplicateId {
                kind: "stage".into(),
                id: stage.id.clone(),
            }
            .into());
        }
    }

    for stage in &workflow.stages {
        for dep in &stage.depends_on {
            if workflow.get_stage(dep).is_none() {
                return Err(ConfigError::MissingRef {
                    kind: "stage".into(),
                    id: dep.clone(),
                    referenced_by: format!("stage '{}' depends_on", stage.id),
                }
                .into());
            }
        }

        if let Some(role_id) = &stage.role_id {
            let role = roles.get(role_id).ok_or_else(|| ConfigError::MissingRef {
                kind: "role".into(),
                id: role_id.clone(),
                referenced_by: format!("stage '{}'", stage.id),
            })?;
            let authorized: HashSet<&str> =
                role.required_skills.iter().map(|r| r.skill_id.as_str()).collect();
            for req in &stage.required_skills {
                if !authorized.contains(req.skill_id.as_str()) {
                    return Err(ConfigError::UnauthorizedStageSkill {
                        stage_id: stage.id.clone(),
                        skill_id: req.skill_id.clone(),
                        role_id: role_id.clone(),
                    }
                    .into());
                }
            }
        }

        for req in &stage.required_skills {
            if !skills.contains_key(&req.skill_id) {
                return Err(ConfigError::MissingRef {
                    kind: "skill".into(),
                    id: req.skill_id.clone(),
                    referenced_by: format!("stage '{}'", stage.id),
                }
                .into());
            }
        }

        for gate in &stage.quality_gates {
            if gate.kind == GateKind::CustomPredicate {
                let predicate_id = gate
                    .parameters
                    .get("predicate_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or(gate.id.as_str());
                if !registered_predicates.iter().any(|p| p == predicate_id) {
                    return Err(ConfigError::UnregisteredPredicate(predicate_id.to_string()).into());
                }
            }
        }
    }

    detect_workflow_cycle(workflow)?;
    Ok(())
}

fn detect_workflow_cycle(workflow: &Workflow) -> StagecraftResult<()> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Visiting,
        Done,
    }
    let mut marks: HashMap<&str, Mark> = HashMap::new();

    fn visit<'a>(
        stage: &'a crate::model::Stage,
        workflow: &'a Workflow,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> StagecraftResult<()> {
        match marks.get(stage.id.as_str()) {
            Some(Mark::Visiting) => return Err(ConfigError::WorkflowCycle(stage.id.clone()).into()),
            Some(Mark::Done) => return Ok(()),
            None => {}
        }
        marks.insert(&stage.id, Mark::Visiting);
        for dep in &stage.depends_on {
            if let Some(dep_stage) = workflow.get_stage(dep) {
                visit(dep_stage, workflow, marks)?;
            }
        }
        marks.insert(&stage.id, Mark::Done);
        Ok(())
    }

    for stage in &workflow.stages {
        visit(stage, workflow, &mut marks)?;
    }
    Ok(())
}
