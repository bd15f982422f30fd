//! The four invoker variants. Each implements [`InvokerBackend`];
//! the common validate/timeout/digest/record enforcement lives in
//! [`crate::dispatch`] so it is applied uniformly regardless of variant.

use async_trait::async_trait;
use serde_json::{json, Value};
use stagecraft_core::{StagecraftError, StagecraftResult};
use stagecraft_llm::{LlmClient, LlmOptions};
use stagecraft_mcp::McpClient;
use stagecraft_registry::{McpAction, Skill};
use std::sync::Arc;

/// What an invoker backend is actually given to run: the skill it was
/// selected for, the validated input payload, and ambient context.
pub struct InvocationRequest<'a> {
    pub skill: &'a Skill,
    pub input: &'a Value,
    /// A rendering of `AgentContext.shared_context` / prior outputs, passed
    /// through opaquely to LLM prompts and left unused by the other variants.
    pub context: &'a Value,
}

/// A concrete execution backend for one invoker variant.
#[async_trait]
pub trait InvokerBackend: Send + Sync {
    /// Whether this backend knows how to run `skill` at all. Consulted by
    /// [`CompositeInvoker`] when `metadata.invoker_type` is unset.
    fn supports(&self, skill: &Skill) -> bool;

    async fn execute(&self, request: InvocationRequest<'_>) -> StagecraftResult<Value>;
}

/// Echoes a structured stub honoring `output_schema`. Always supports every
/// skill; used in tests and as the default when no richer backend is wired.
#[derive(Default)]
pub struct PlaceholderInvoker;

#[async_trait]
impl InvokerBackend for PlaceholderInvoker {
    fn supports(&self, _skill: &Skill) -> bool {
        true
    }

    async fn execute(&self, request: InvocationRequest<'_>) -> StagecraftResult<Value> {
        Ok(placeholder_value(request.skill.output_schema.as_ref()))
    }
}

/// Builds a value that satisfies a JSON-Schema's declared `type` (and
/// recurses into `properties`/`items`) well enough to pass validation, for
/// skills with no live backend configured.
fn placeholder_value(schema: Option<&Value>) -> Value {
    let Some(schema) = schema.and_then(Value::as_object) else {
        return json!({"placeholder": true});
    };
    match schema.get("type").and_then(Value::as_str) {
        Some("object") => {
            let mut obj = serde_json::Map::new();
            if let Some(props) = schema.get("properties").and_then(Value::as_object) {
                for (key, sub_schema) in props {
                    obj.insert(key.clone(), placeholder_value(Some(sub_schema)));
                }
            }
            Value::Object(obj)
        }
        Some("array") => {
            let item = schema.get("items").map_or(Value::Null, |s| placeholder_value(Some(s)));
            Value::Array(vec![item])
        }
        Some("string") => Value::String("placeholder".to_string()),
        Some("number") | Some("integer") => json!(0),
        Some("boolean") => Value::Bool(true),
        _ => json!({"placeholder": true}),
    }
}

/// Serializes `(skill.description, input, context)` into a prompt and
/// delegates to an injected [`LlmClient`].
pub struct LlmInvoker {
    client: Arc<dyn LlmClient>,
}

impl LlmInvoker {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    fn render_prompt(skill: &Skill, input: &Value, context: &Value) -> String {
        format!(
            "Skill: {}\nDescription: {}\nInput: {}\nContext: {}\n\nRespond with JSON matching the skill's output schema.",
            skill.name, skill.description, input, context
        )
    }
}

#[async_trait]
impl InvokerBackend for LlmInvoker {
    fn supports(&self, skill: &Skill) -> bool {
        matches!(skill.skill_type, stagecraft_registry::SkillType::Cognitive)
            || skill.metadata.invoker_type.as_deref() == Some("llm")
    }

    async fn execute(&self, request: InvocationRequest<'_>) -> StagecraftResult<Value> {
        let prompt = Self::render_prompt(request.skill, request.input, request.context);
        let options = LlmOptions::default();
        let text = self.client.complete(&prompt, &options).await?;
        serde_json::from_str(&text)
            .or_else(|_| Ok::<Value, StagecraftError>(json!({ "text": text })))
    }
}

/// Honors `skill.metadata.mcp` by issuing the matching MCP request.
pub struct McpInvoker {
    client: Arc<dyn McpClient>,
}

impl McpInvoker {
    pub fn new(client: Arc<dyn McpClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl InvokerBackend for McpInvoker {
    fn supports(&self, skill: &Skill) -> bool {
        skill.metadata.mcp.is_some()
    }

    async fn execute(&self, request: InvocationRequest<'_>) -> StagecraftResult<Value> {
        let mcp = request.skill.metadata.mcp.as_ref().ok_or_else(|| {
            StagecraftError::InsufficientContext(format!(
                "skill '{}' has no mcp metadata",
                request.skill.id
            ))
        })?;
        match mcp.action {
            McpAction::ListResources => {
                let resources = self.client.list_resources(&mcp.server).await?;
                Ok(serde_json::to_value(resources)?)
            }
            McpAction::FetchResource => {
                let uri = mcp.resource_uri.as_ref().ok_or_else(|| {
                    StagecraftError::InsufficientContext(format!(
                        "skill '{}' mcp.fetch_resource missing resource_uri",
                        request.skill.id
                    ))
                })?;
                self.client.fetch_resource(&mcp.server, uri).await
            }
            McpAction::CallTool => {
                let tool = mcp.tool.as_ref().ok_or_else(|| {
                    StagecraftError::InsufficientContext(format!(
                        "skill '{}' mcp.call_tool missing tool",
                        request.skill.id
                    ))
                })?;
                let result = self
                    .client
                    .call_tool(&mcp.server, tool, request.input.clone())
                    .await?;
                Ok(serde_json::to_value(result)?)
            }
        }
    }
}

/// Ordered list of backends. Picks the first whose `supports(skill)` returns
/// true, unless `metadata.invoker_type` names one directly.
pub struct CompositeInvoker {
    named: Vec<(String, Arc<dyn InvokerBackend>)>,
}

impl CompositeInvoker {
    pub fn new(named: Vec<(String, Arc<dyn InvokerBackend>)>) -> Self {
        Self { named }
    }

    fn resolve(&self, skill: &Skill) -> StagecraftResult<&Arc<dyn InvokerBackend>> {
        if let Some(wanted) = skill.metadata.invoker_type.as_deref() {
            return self
                .named
                .iter()
                .find(|(name, _)| name == wanted)
                .map(|(_, backend)| backend)
                .ok_or_else(|| {
                    StagecraftError::NoSkillAvailable(format!(
                        "invoker_type '{wanted}' not registered for skill '{}'",
                        skill.id
                    ))
                });
        }
        self.named
            .iter()
            .find(|(_, backend)| backend.supports(skill))
            .map(|(_, backend)| backend)
            .ok_or_else(|| {
                StagecraftError::NoSkillAvailable(format!(
                    "no invoker backend supports skill '{}'",
                    skill.id
                ))
            })
    }
}

#[async_trait]
impl InvokerBackend for CompositeInvoker {
    fn supports(&self, skill: &Skill) -> bool {
        self.resolve(skill).is_ok()
    }

    async fn execute(&self, request: InvocationRequest<'_>) -> StagecraftResult<Value> {
        let backend = self.resolve(request.skill)?;
        backend
            .execute(InvocationRequest {
                skill: request.skill,
                input: request.input,
                context: request.context,
            })
            .await
    }
}
