//! Generic HTTP transport for [`crate::LlmClient`]. Posts a single
//! `{prompt, options}` envelope and expects `{text}` back — the
//! vendor-specific shape is pushed to whatever gateway sits behind the
//! configured URL, keeping the client itself opaque.

use crate::{LlmClient, LlmOptions, StreamEvent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stagecraft_core::{StagecraftError, StagecraftResult};
use tokio::sync::mpsc;
use tracing::{instrument, warn};

#[derive(Serialize)]
struct CompletionRequest<'a> {
    prompt: &'a str,
    #[serde(flatten)]
    options: &'a LlmOptions,
}

#[derive(Deserialize)]
struct CompletionResponse {
    text: String,
}

/// Posts completion requests to a configured HTTP endpoint.
pub struct HttpLlmClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpLlmClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn build_request(&self, prompt: &str, options: &LlmOptions) -> reqwest::RequestBuilder {
        let mut builder = self
            .http
            .post(&self.endpoint)
            .json(&CompletionRequest { prompt, options });
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    #[instrument(skip(self, prompt, options), fields(endpoint = %self.endpoint))]
    async fn complete(&self, prompt: &str, options: &LlmOptions) -> StagecraftResult<String> {
        let response = self
            .build_request(prompt, options)
            .send()
            .await
            .map_err(|e| StagecraftError::Execution(format!("llm request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "llm backend returned error status");
            return Err(StagecraftError::Execution(format!(
                "llm backend returned {status}: {body}"
            )));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| StagecraftError::Execution(format!("invalid llm response body: {e}")))?;
        Ok(parsed.text)
    }

    async fn complete_stream(
        &self,
        prompt: &str,
        options: &LlmOptions,
    ) -> StagecraftResult<mpsc::Receiver<StreamEvent>> {
        // The opaque transport has no server-sent-event contract in scope;
        // emulate a stream of one chunk so callers can treat both modes
        // uniformly.
        let text = self.complete(prompt, options).await;
        let (tx, rx) = mpsc::channel(2);
        match text {
            Ok(text) => {
                let _ = tx.send(StreamEvent::TextDelta { text }).await;
                let _ = tx.send(StreamEvent::Done).await;
            }
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
            }
        }
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_bearer_auth_request() {
        let client = HttpLlmClient::new("https://example.invalid/complete").with_api_key("secret");
        assert_eq!(client.endpoint, "https://example.invalid/complete");
        assert_eq!(client.api_key.as_deref(), Some("secret"));
    }
}
