//! Role/skill/bundle/workflow data model and load-time validation.
//!
//! [`Registry::load`] is total: a partially valid config is rejected outright
//! so every other `stagecraft-*` crate can assume all references resolve.

mod model;
mod registry;

pub use model::{
    BundleMember, GateKind, McpAction, McpMetadata, QualityGate, RegistryConfig, Role, RoleConstraints,
    RoleDef, Skill, SkillBundle, SkillMetadata, SkillRequirement, SkillType, Stage, Workflow,
};
pub use registry::Registry;
