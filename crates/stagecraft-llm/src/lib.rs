//! Opaque LLM transport abstraction.
//!
//! The engine treats the LLM itself as an opaque callable: `(prompt, options)
//! -> response | stream of tokens`. This crate supplies that trait plus one
//! concrete HTTP-backed implementation and a retrying wrapper; neither the
//! LLM-backed invoker (`stagecraft-invoker`) nor the LLM decomposition
//! strategy (`stagecraft-decompose`) care which concrete client they hold.
//! Absence of a configured client disables both without degrading the rest
//! of the engine.

mod failover;
mod http;
mod stream;

pub use failover::{is_retryable, RetryPolicy, RetryingLlmClient};
pub use http::HttpLlmClient;
pub use stream::StreamEvent;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stagecraft_core::StagecraftResult;
use tokio::sync::mpsc;

/// Options recognized by every `LlmClient` implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmOptions {
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub model: Option<String>,
}

impl Default for LlmOptions {
    fn default() -> Self {
        Self {
            max_tokens: Some(4096),
            temperature: Some(0.7),
            stream: false,
            model: None,
        }
    }
}

/// A callable accepting `(prompt, options)` and returning either a full
/// response or a stream of tokens. The engine remains operational with
/// this trait unimplemented/absent — only the LLM-backed invoker and the
/// LLM decomposition strategy depend on it.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Block until the full response text is available.
    async fn complete(&self, prompt: &str, options: &LlmOptions) -> StagecraftResult<String>;

    /// Stream the response as it is generated. The returned receiver yields
    /// [`StreamEvent`]s ending in `Done` or `Error`.
    async fn complete_stream(
        &self,
        prompt: &str,
        options: &LlmOptions,
    ) -> StagecraftResult<mpsc::Receiver<StreamEvent>>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_util {
    use super::*;
    use std::sync::Mutex;

    /// A fixed-response test double for exercising retry/failover and
    /// agent-reasoning code paths without a live backend.
    pub struct StubLlmClient {
        responses: Mutex<Vec<StagecraftResult<String>>>,
    }

    impl StubLlmClient {
        pub fn new(responses: Vec<StagecraftResult<String>>) -> Self {
            Self {
                responses: Mutex::new(responses),
            }
        }
    }

    #[async_trait]
    impl LlmClient for StubLlmClient {
        async fn complete(&self, _prompt: &str, _options: &LlmOptions) -> StagecraftResult<String> {
            let mut responses = self.responses.lock().unwrap_or_else(|e| e.into_inner());
            if responses.is_empty() {
                return Err(stagecraft_core::StagecraftError::Execution(
                    "StubLlmClient: no more responses".into(),
                ));
            }
            responses.remove(0)
        }

        async fn complete_stream(
            &self,
            prompt: &str,
            options: &LlmOptions,
        ) -> StagecraftResult<mpsc::Receiver<StreamEvent>> {
            let text = self.complete(prompt, options).await?;
            let (tx, rx) = mpsc::channel(4);
            let _ = tx.send(StreamEvent::TextDelta { text }).await;
            let _ = tx.send(StreamEvent::Done).await;
            Ok(rx)
        }
    }
}
