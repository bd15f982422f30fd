//! The reasoning layer. An [`Agent`] builds an [`AgentContext`], produces
//! an ordered list of [`Intent`]s, and reviews peer output — it never
//! dispatches a skill itself. This crate has no dependency on
//! `stagecraft-invoker` at all, so an `Agent` cannot hold an `Invoker`
//! reference even by mistake.

use crate::context::AgentContext;
use crate::intent::{Intent, ReviewOutcome};
use serde_json::Value;
use stagecraft_bus::{AgentMessage, MessageKind, Recipient, SharedBus};
use stagecraft_core::{EntityId, StagecraftError, StagecraftResult};
use stagecraft_llm::{LlmClient, LlmOptions};
use stagecraft_registry::Role;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// A reasoning actor bound to a [`Role`]. Holds an optional LLM
/// client for reasoning and a handle to the [`stagecraft_bus::Bus`] for
/// coordination — and nothing else.
pub struct Agent {
    id: EntityId,
    role: Role,
    bus: SharedBus,
    llm: Option<Arc<dyn LlmClient>>,
}

impl Agent {
    pub fn new(id: impl Into<EntityId>, role: Role, bus: SharedBus) -> Self {
        let id = id.into();
        bus.register_agent(id.clone());
        Self { id, role, bus, llm: None }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Builds an [`AgentContext`] from `project_context`, a snapshot of the
    /// Bus shared-context, and any pending messages, then produces an
    /// ordered, non-empty list of [`Intent`]s for `goal`.
    ///
    /// Falls back to rule-based splitting when no LLM client is configured,
    /// or when the configured one fails or returns something unparseable —
    /// mirroring the Decomposer's LLM/rule-strategy split at the level of a
    /// single agent's reasoning step.
    pub async fn prepare(
        &self,
        goal: &str,
        project_context: HashMap<String, Value>,
    ) -> StagecraftResult<(AgentContext, Vec<Intent>)> {
        let shared_context = self.bus.context_snapshot();
        let messages = self.bus.subscribe(&self.id);
        let ctx = AgentContext::new(self.role.clone(), project_context, shared_context);

        let intents = match &self.llm {
            Some(client) => match self.reason_intents(client.as_ref(), goal, &ctx, &messages).await {
                Ok(intents) if !intents.is_empty() => intents,
                Ok(_) => {
                    warn!(agent = %self.id, "llm returned zero intents, falling back to rule strategy");
                    rule_based_intents(goal)
                }
                Err(e) => {
                    warn!(agent = %self.id, error = %e, "llm reasoning failed, falling back to rule strategy");
                    rule_based_intents(goal)
                }
            },
            None => rule_based_intents(goal),
        };

        if intents.is_empty() {
            return Err(StagecraftError::InsufficientContext(format!(
                "agent '{}' produced no intents for goal '{goal}'",
                self.id
            )));
        }

        info!(agent = %self.id, role = %self.role.id, count = intents.len(), "agent prepared intents");
        Ok((ctx, intents))
    }

    async fn reason_intents(
        &self,
        client: &dyn LlmClient,
        goal: &str,
        ctx: &AgentContext,
        messages: &[AgentMessage],
    ) -> StagecraftResult<Vec<Intent>> {
        let prompt = render_prompt(&self.role, goal, ctx, messages);
        let response = client.complete(&prompt, &LlmOptions::default()).await?;
        parse_intents(&response).ok_or_else(|| {
            StagecraftError::Execution(format!("agent '{}': unparseable intent response", self.id))
        })
    }

    /// Reasons over another agent's artifact and returns an approval
    /// decision. Falls back to a non-empty-output heuristic when
    /// no LLM client is configured.
    pub async fn review_output(&self, other_agent: &str, output: &Value) -> StagecraftResult<ReviewOutcome> {
        match &self.llm {
            Some(client) => {
                let prompt = format!(
                    "Role: {}\nReview the output produced by agent '{other_agent}':\n{output}\n\n\
                     Respond with JSON: {{\"approved\": bool, \"comments\": string, \"suggested_revisions\": [string]}}.",
                    self.role.name
                );
                let response = client.complete(&prompt, &LlmOptions::default()).await?;
                Ok(parse_review(&response).unwrap_or_else(|| heuristic_review(output)))
            }
            None => Ok(heuristic_review(output)),
        }
    }

    /// Publishes a request for feedback to `other_agent`, carrying `artifact`.
    pub fn request_feedback(&self, other_agent: &str, artifact: Value) {
        self.send_message(Recipient::Agent(other_agent.into()), MessageKind::Request, artifact);
    }

    /// Publishes a message to the Bus as this agent.
    pub fn send_message(&self, to: Recipient, kind: MessageKind, payload: Value) {
        self.bus.publish(AgentMessage::new(self.id.clone(), to, kind, payload));
    }

    /// Reads this agent's mailbox without draining it.
    pub fn check_messages(&self) -> Vec<AgentMessage> {
        self.bus.peek(&self.id)
    }

    /// Drains and returns this agent's mailbox.
    pub fn get_messages(&self) -> Vec<AgentMessage> {
        self.bus.subscribe(&self.id)
    }

    /// Publishes a value into the Bus shared-context map as this agent.
    pub fn share_context(&self, key: impl Into<String>, value: Value) {
        self.bus.share_context(self.id.clone(), key, value);
    }
}

fn render_prompt(role: &Role, goal: &str, ctx: &AgentContext, messages: &[AgentMessage]) -> String {
    let shared: Vec<String> = ctx.shared_context.keys().cloned().collect();
    let pending = messages.len();
    format!(
        "Role: {} ({})\nGoal: {goal}\nShared context keys: {shared:?}\nPending messages: {pending}\n\n\
         Decompose the goal into an ordered JSON array of intents: \
         [{{\"description\": string, \"focus\": [string]}}, ...].",
        role.name, role.description
    )
}

fn parse_intents(response: &str) -> Option<Vec<Intent>> {
    serde_json::from_str::<Vec<Intent>>(response).ok().filter(|v| !v.is_empty())
}

fn parse_review(response: &str) -> Option<ReviewOutcome> {
    serde_json::from_str(response).ok()
}

fn heuristic_review(output: &Value) -> ReviewOutcome {
    let approved = match output {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    };
    ReviewOutcome {
        approved,
        comments: if approved {
            "output is non-empty".to_string()
        } else {
            "output is empty or null".to_string()
        },
        suggested_revisions: vec![],
    }
}

/// Splits `goal` into intents on conjunctions, the fallback always available
/// regardless of LLM configuration.
fn rule_based_intents(goal: &str) -> Vec<Intent> {
    goal.split([',', '.'])
        .flat_map(|clause| clause.split(" and "))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Intent::new)
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use stagecraft_bus::Bus;
    use stagecraft_llm::test_util::StubLlmClient;
    use stagecraft_registry::RoleConstraints;

    fn role() -> Role {
        Role {
            id: "writer".into(),
            name: "Writer".into(),
            description: "writes things".into(),
            required_skills: vec![],
            constraints: RoleConstraints::default(),
            validation_rules: vec![],
        }
    }

    #[tokio::test]
    async fn rule_strategy_splits_conjunctions_without_llm() {
        let bus = Arc::new(Bus::new());
        let agent = Agent::new("a1", role(), bus);
        let (_ctx, intents) = agent.prepare("build X and review X", HashMap::new()).await.unwrap();
        assert_eq!(intents.len(), 2);
        assert_eq!(intents[0].description, "build X");
        assert_eq!(intents[1].description, "review X");
    }

    #[tokio::test]
    async fn llm_strategy_parses_structured_intents() {
        let bus = Arc::new(Bus::new());
        let llm = Arc::new(StubLlmClient::new(vec![Ok(
            r#"[{"description": "write draft", "focus": ["prose"]}]"#.to_string(),
        )]));
        let agent = Agent::new("a1", role(), bus).with_llm(llm);
        let (_ctx, intents) = agent.prepare("write a memo", HashMap::new()).await.unwrap();
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].description, "write draft");
        assert_eq!(intents[0].focus, vec!["prose".to_string()]);
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_rule_strategy() {
        let bus = Arc::new(Bus::new());
        let llm = Arc::new(StubLlmClient::new(vec![Err(StagecraftError::Execution("down".into()))]));
        let agent = Agent::new("a1", role(), bus).with_llm(llm);
        let (_ctx, intents) = agent.prepare("build X and ship X", HashMap::new()).await.unwrap();
        assert_eq!(intents.len(), 2);
    }

    #[tokio::test]
    async fn empty_goal_is_insufficient_context() {
        let bus = Arc::new(Bus::new());
        let agent = Agent::new("a1", role(), bus);
        let err = agent.prepare("   ", HashMap::new()).await.unwrap_err();
        assert!(matches!(err, StagecraftError::InsufficientContext(_)));
    }

    #[tokio::test]
    async fn review_output_heuristic_rejects_empty_output() {
        let bus = Arc::new(Bus::new());
        let agent = Agent::new("a1", role(), bus);
        let outcome = agent.review_output("other", &Value::String(String::new())).await.unwrap();
        assert!(!outcome.approved);
    }

    #[tokio::test]
    async fn review_output_heuristic_approves_nonempty_output() {
        let bus = Arc::new(Bus::new());
        let agent = Agent::new("a1", role(), bus);
        let outcome = agent.review_output("other", &serde_json::json!({"result": "ok"})).await.unwrap();
        assert!(outcome.approved);
    }

    #[tokio::test]
    async fn send_and_check_messages_round_trip_via_bus() {
        let bus = Arc::new(Bus::new());
        let a = Agent::new("a", role(), Arc::clone(&bus));
        let b = Agent::new("b", role(), Arc::clone(&bus));

        a.send_message(Recipient::Agent("b".into()), MessageKind::Notification, serde_json::json!("hi"));
        assert_eq!(b.check_messages().len(), 1);
        assert_eq!(b.get_messages().len(), 1);
        assert!(b.get_messages().is_empty(), "get_messages drains the mailbox");
    }

    #[tokio::test]
    async fn share_context_is_visible_to_other_agents_on_next_prepare() {
        let bus = Arc::new(Bus::new());
        let a = Agent::new("a", role(), Arc::clone(&bus));
        let b = Agent::new("b", role(), Arc::clone(&bus));

        a.share_context("artifact:x", serde_json::json!("value"));
        let (ctx, _) = b.prepare("review artifact x", HashMap::new()).await.unwrap();
        assert_eq!(ctx.shared_context.get("artifact:x"), Some(&serde_json::json!("value")));
    }
}
