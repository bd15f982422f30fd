//! The output of [`crate::Agent::prepare`]: intents the Orchestrator feeds
//! to the Selector, and the result of a peer-review pass.

use serde::{Deserialize, Serialize};

/// A task description the agent wishes to achieve, produced in the order it
/// should be pursued — the Orchestrator executes intents strictly in the
/// order the Agent emitted them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub description: String,
    /// Optional focus tags, passed through to skill selection as a hint
    /// (mirrors `SkillRequirement::focus`).
    #[serde(default)]
    pub focus: Vec<String>,
}

impl Intent {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            focus: Vec::new(),
        }
    }

    pub fn with_focus(mut self, focus: Vec<String>) -> Self {
        self.focus = focus;
        self
    }
}

/// The result of [`crate::Agent::review_output`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub approved: bool,
    pub comments: String,
    #[serde(default)]
    pub suggested_revisions: Vec<String>,
}
