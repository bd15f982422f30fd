//! Skill dispatch layer. Polymorphic over four variants —
//! placeholder, LLM, MCP, composite — behind a common enforcement wrapper
//! ([`dispatch`]) that every variant goes through identically.

mod backend;
mod dispatch;

pub use backend::{CompositeInvoker, InvocationRequest, InvokerBackend, LlmInvoker, McpInvoker, PlaceholderInvoker};
pub use dispatch::{dispatch, DispatchContext, DispatchOutcome};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stagecraft_core::CancellationToken;
    use stagecraft_registry::{Skill, SkillMetadata, SkillType};
    use stagecraft_tracker::Tracker;

    fn sample_skill(output_schema: Option<serde_json::Value>) -> Skill {
        Skill {
            id: "summarize".to_string(),
            name: "Summarize".to_string(),
            description: "Summarize text".to_string(),
            dimensions: vec![],
            levels: Default::default(),
            tools: vec![],
            constraints: vec![],
            input_schema: Some(json!({
                "type": "object",
                "required": ["text"],
                "properties": { "text": { "type": "string" } }
            })),
            output_schema,
            metadata: SkillMetadata::default(),
            skill_type: SkillType::Procedural,
            deterministic: true,
            testable: true,
            side_effects: vec![],
            execution_capabilities: vec![],
        }
    }

    #[tokio::test]
    async fn placeholder_invoker_honors_output_schema() {
        let backend = PlaceholderInvoker;
        let skill = sample_skill(Some(json!({
            "type": "object",
            "properties": { "summary": { "type": "string" } }
        })));
        let tracker = Tracker::new();
        let cancellation = CancellationToken::new();
        let outcome = dispatch(
            &backend,
            &skill,
            json!({"text": "hello world"}),
            &json!({}),
            DispatchContext {
                owner_id: "task-1",
                role_id: "writer",
                cancellation: &cancellation,
            },
            &tracker,
        )
        .await
        .expect("placeholder dispatch should succeed");

        assert_eq!(outcome.output["summary"], json!("placeholder"));
        assert_eq!(tracker.recent(1).len(), 1);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_execution() {
        let backend = PlaceholderInvoker;
        let skill = sample_skill(None);
        let tracker = Tracker::new();
        let cancellation = CancellationToken::new();
        let err = dispatch(
            &backend,
            &skill,
            json!({"wrong_field": 1}),
            &json!({}),
            DispatchContext {
                owner_id: "task-1",
                role_id: "writer",
                cancellation: &cancellation,
            },
            &tracker,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, stagecraft_core::StagecraftError::Validation(_)));
        assert_eq!(tracker.recent(1).len(), 0);
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let backend = PlaceholderInvoker;
        let skill = sample_skill(None);
        let tracker = Tracker::new();
        let cancellation = CancellationToken::new();
        cancellation.cancel();
        let err = dispatch(
            &backend,
            &skill,
            json!({"text": "hi"}),
            &json!({}),
            DispatchContext {
                owner_id: "task-1",
                role_id: "writer",
                cancellation: &cancellation,
            },
            &tracker,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, stagecraft_core::StagecraftError::Cancelled));
    }

    #[tokio::test]
    async fn composite_routes_by_invoker_type() {
        let mut skill = sample_skill(None);
        skill.metadata.invoker_type = Some("placeholder".to_string());
        let composite = CompositeInvoker::new(vec![(
            "placeholder".to_string(),
            std::sync::Arc::new(PlaceholderInvoker) as std::sync::Arc<dyn InvokerBackend>,
        )]);
        let tracker = Tracker::new();
        let cancellation = CancellationToken::new();
        let outcome = dispatch(
            &composite,
            &skill,
            json!({"text": "hi"}),
            &json!({}),
            DispatchContext {
                owner_id: "task-1",
                role_id: "writer",
                cancellation: &cancellation,
            },
            &tracker,
        )
        .await
        .expect("composite should route to placeholder");
        assert_eq!(outcome.output, json!({"placeholder": true}));
    }

    #[tokio::test]
    async fn composite_reports_no_skill_available_when_unrouted() {
        let mut skill = sample_skill(None);
        skill.metadata.invoker_type = Some("llm".to_string());
        let composite = CompositeInvoker::new(vec![]);
        let tracker = Tracker::new();
        let cancellation = CancellationToken::new();
        let err = dispatch(
            &composite,
            &skill,
            json!({"text": "hi"}),
            &json!({}),
            DispatchContext {
                owner_id: "task-1",
                role_id: "writer",
                cancellation: &cancellation,
            },
            &tracker,
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            stagecraft_core::StagecraftError::NoSkillAvailable(_)
        ));
    }
}
