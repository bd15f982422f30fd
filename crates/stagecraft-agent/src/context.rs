//! [`AgentContext`]: the working state an [`crate::Agent`] builds before
//! reasoning about a goal.

use serde_json::Value;
use stagecraft_registry::Role;
use std::collections::HashMap;
use uuid::Uuid;

/// Everything an agent has visible to it while producing intents: its role,
/// opaque project context handed down by the caller, a copy-on-read snapshot
/// of the Bus shared-context map taken at `prepare` time, accumulated
/// `outputs` from dispatched intents, and references to the
/// `SkillExecution`s that produced them.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub role: Role,
    pub project_context: HashMap<String, Value>,
    /// A snapshot, not a live view — taken once at `prepare` time.
    pub shared_context: HashMap<String, Value>,
    pub outputs: HashMap<String, Value>,
    pub history: Vec<Uuid>,
}

impl AgentContext {
    pub fn new(
        role: Role,
        project_context: HashMap<String, Value>,
        shared_context: HashMap<String, Value>,
    ) -> Self {
        Self {
            role,
            project_context,
            shared_context,
            outputs: HashMap::new(),
            history: Vec::new(),
        }
    }

    /// Merge a dispatched intent's output into `outputs` and record the
    /// `SkillExecution` id that produced it, under `output_name`.
    pub fn record_output(&mut self, output_name: impl Into<String>, value: Value, execution_id: Uuid) {
        self.outputs.insert(output_name.into(), value);
        self.history.push(execution_id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use stagecraft_registry::RoleConstraints;

    fn role() -> Role {
        Role {
            id: "writer".into(),
            name: "Writer".into(),
            description: "".into(),
            required_skills: vec![],
            constraints: RoleConstraints::default(),
            validation_rules: vec![],
        }
    }

    #[test]
    fn record_output_accumulates_history() {
        let mut ctx = AgentContext::new(role(), HashMap::new(), HashMap::new());
        let id = Uuid::new_v4();
        ctx.record_output("result", serde_json::json!("ok"), id);
        assert_eq!(ctx.outputs["result"], serde_json::json!("ok"));
        assert_eq!(ctx.history, vec![id]);
    }
}
