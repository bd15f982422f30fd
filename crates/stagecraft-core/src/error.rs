use thiserror::Error;

/// The complete failure taxonomy for the orchestration kernel.
///
/// Every subsystem's own error type converts into this one so callers at the
/// workflow-executor boundary can match on a single enum.
#[derive(Error, Debug)]
pub enum StagecraftError {
    /// Malformed or inconsistent registry input. Fatal at startup.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Skill input or output failed its JSON-Schema.
    #[error("validation error: {0}")]
    Validation(String),

    /// A backend failure (LLM error, MCP failure, predicate exception).
    #[error("execution error: {0}")]
    Execution(String),

    /// An invoker call exceeded `metadata.timeout_ms`.
    #[error("timeout after {0}ms")]
    Timeout(u64),

    /// An agent could not produce any intents for its task.
    #[error("insufficient context: {0}")]
    InsufficientContext(String),

    /// The skill selector found no authorized, non-zero-scoring candidate.
    #[error("no skill available for task: {0}")]
    NoSkillAvailable(String),

    /// One or more blocking quality gates failed.
    #[error("gate failure: {0:?}")]
    GateFailure(Vec<String>),

    /// The workflow was cancelled.
    #[error("cancelled")]
    Cancelled,

    /// An invariant was violated (e.g. an Agent reached an Invoker).
    #[error("internal error: {0}")]
    Internal(String),

    /// The Decomposer's dependency graph over tasks formed a cycle.
    #[error("cyclic task decomposition involving task '{0}'")]
    CyclicDecomposition(String),

    /// JSON (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem or other I/O failure (state store, checkpoint store).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Structured sub-taxonomy for registry-load failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A `SkillRequirement`, gate predicate, or role pointed at an id that
    /// does not exist in the registry.
    #[error("missing reference: {kind} '{id}' referenced by {referenced_by}")]
    MissingRef {
        /// The kind of entity that was referenced (e.g. "skill", "role").
        kind: String,
        /// The id that could not be resolved.
        id: String,
        /// What referenced it, for diagnostics.
        referenced_by: String,
    },

    /// Two entities of the same kind were registered under the same id.
    #[error("duplicate {kind} id: {id}")]
    DuplicateId {
        /// The kind of entity (e.g. "skill", "role", "stage").
        kind: String,
        /// The duplicated id.
        id: String,
    },

    /// Expanding a `SkillBundle`'s requirements formed a cycle.
    #[error("bundle expansion cycle starting at {0}")]
    BundleCycle(String),

    /// A role's `allowed_actions` and `forbidden_actions` intersect.
    #[error("role '{role_id}' has overlapping allowed/forbidden actions: {overlap:?}")]
    ForbiddenAllowedOverlap {
        /// The offending role.
        role_id: String,
        /// The actions present in both sets.
        overlap: Vec<String>,
    },

    /// A `min_level` fell outside the valid 1..3 range.
    #[error("level {level} out of range (must be 1..=3) for skill '{skill_id}'")]
    LevelOutOfRange {
        /// The skill the level was declared against.
        skill_id: String,
        /// The offending level value.
        level: i64,
    },

    /// The workflow's `depends_on` graph contains a cycle.
    #[error("workflow dependency cycle involving stage '{0}'")]
    WorkflowCycle(String),

    /// A gate's `custom_predicate` id was never registered.
    #[error("unregistered custom predicate '{0}'")]
    UnregisteredPredicate(String),

    /// A stage's skill requirement is not authorized by its assigned role.
    #[error("stage '{stage_id}' requires skill '{skill_id}' not authorized for role '{role_id}'")]
    UnauthorizedStageSkill {
        /// The stage.
        stage_id: String,
        /// The skill it required.
        skill_id: String,
        /// The role assigned to the stage.
        role_id: String,
    },
}

/// Convenience alias used throughout the workspace.
pub type StagecraftResult<T> = Result<T, StagecraftError>;
