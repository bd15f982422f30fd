//! The immutable data model loaded by the [`crate::Registry`].
//!
//! Every type here is produced by a config provider (out of scope for this
//! crate) and never mutated again. `Registry::load` is the only
//! place these types are constructed into a validated, cross-referenced whole.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use stagecraft_core::EntityId;

/// A capability unit with typed input/output and a declared invocation backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub id: EntityId,
    pub name: String,
    pub description: String,
    /// Free-form tags used by the selector's lexical affinity scoring.
    #[serde(default)]
    pub dimensions: Vec<String>,
    /// Per-level description, keyed by 1, 2, or 3.
    #[serde(default)]
    pub levels: HashMap<u8, String>,
    /// Opaque tool identifiers this skill is allowed to use when dispatched.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Opaque policy tags (e.g. `"no-network"`, `"requires-review"`).
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub metadata: SkillMetadata,
    pub skill_type: SkillType,
    #[serde(default)]
    pub deterministic: bool,
    #[serde(default)]
    pub testable: bool,
    /// Declared side effects; empty means "none", which combined with
    /// `deterministic = true` makes this skill safe to reuse by digest.
    #[serde(default)]
    pub side_effects: Vec<String>,
    /// Capabilities the skill exercises when invoked, checked against a
    /// role's `forbidden_actions` by the selector.
    #[serde(default)]
    pub execution_capabilities: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillType {
    Cognitive,
    Procedural,
    Hybrid,
}

/// Typed metadata carrying invoker hints, with a passthrough for unknown keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillMetadata {
    #[serde(default)]
    pub execution_mode: Option<String>,
    #[serde(default)]
    pub mcp: Option<McpMetadata>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub invoker_type: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpMetadata {
    pub action: McpAction,
    pub server: String,
    #[serde(default)]
    pub resource_uri: Option<String>,
    #[serde(default)]
    pub tool: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum McpAction {
    ListResources,
    FetchResource,
    CallTool,
}

/// A requirement on a specific skill at a minimum proficiency level.
///
/// May instead reference a [`SkillBundle`] id, in which case `Registry::load`
/// expands it transitively into its member requirements at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillRequirement {
    pub skill_id: EntityId,
    pub min_level: u8,
    #[serde(default)]
    pub focus: Vec<String>,
}

/// A named, reusable set of skill requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillBundle {
    pub id: EntityId,
    pub requirements: Vec<BundleMember>,
}

/// A member of a [`SkillBundle`]: either a concrete skill requirement or a
/// reference to another bundle, expanded recursively at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BundleMember {
    Skill(SkillRequirement),
    Bundle { bundle_id: EntityId },
}

/// Allowed/forbidden action sets for a role. Invariant: the two sets are
/// disjoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleConstraints {
    #[serde(default)]
    pub allowed_actions: Vec<String>,
    #[serde(default)]
    pub forbidden_actions: Vec<String>,
}

/// A role definition as supplied by the config provider, before bundle/
/// `extends` expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleDef {
    pub id: EntityId,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub required_skills: Vec<SkillRequirement>,
    /// Other role ids whose (already-expanded) `required_skills` are unioned
    /// into this role at load time — composition, not runtime inheritance.
    #[serde(default)]
    pub extends: Vec<EntityId>,
    #[serde(default)]
    pub constraints: RoleConstraints,
    #[serde(default)]
    pub validation_rules: Vec<String>,
}

/// A fully resolved role: `required_skills` is the post-expansion union,
/// keyed by the maximum `min_level` across all contributing requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: EntityId,
    pub name: String,
    pub description: String,
    pub required_skills: Vec<SkillRequirement>,
    pub constraints: RoleConstraints,
    pub validation_rules: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    ArtifactExists,
    RegexMatch,
    CustomPredicate,
    CountThreshold,
}

/// A predicate evaluated at stage completion that can block progression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGate {
    pub id: EntityId,
    pub kind: GateKind,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default = "default_blocking")]
    pub blocking: bool,
}

fn default_blocking() -> bool {
    true
}

/// A node in the workflow DAG, resolved to one or more tasks at execution
/// time by the Decomposer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub role_id: Option<EntityId>,
    #[serde(default)]
    pub required_skills: Vec<SkillRequirement>,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<EntityId>,
    #[serde(default)]
    pub quality_gates: Vec<QualityGate>,
    #[serde(default)]
    pub parallelizable: bool,
}

/// An ordered list of [`Stage`]s forming a DAG over `depends_on`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: EntityId,
    pub name: String,
    pub stages: Vec<Stage>,
}

impl Workflow {
    /// The stages with no `depends_on` entries.
    pub fn source_stages(&self) -> Vec<&Stage> {
        self.stages.iter().filter(|s| s.depends_on.is_empty()).collect()
    }

    /// The stages no other stage declares a dependency on.
    pub fn terminal_stages(&self) -> Vec<&Stage> {
        let depended_on: std::collections::HashSet<&str> = self
            .stages
            .iter()
            .flat_map(|s| s.depends_on.iter().map(String::as_str))
            .collect();
        self.stages
            .iter()
            .filter(|s| !depended_on.contains(s.id.as_str()))
            .collect()
    }

    pub fn get_stage(&self, id: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.id == id)
    }
}

/// The raw, unvalidated collection a config provider hands to `Registry::load`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub skills: Vec<Skill>,
    #[serde(default)]
    pub bundles: Vec<SkillBundle>,
    pub roles: Vec<RoleDef>,
    pub workflow: Workflow,
    /// Predicate ids registered with the Quality Gate Evaluator out-of-band;
    /// any `custom_predicate` gate must reference one of these or load fails.
    #[serde(default)]
    pub registered_predicates: Vec<String>,
}
