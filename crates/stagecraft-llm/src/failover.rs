//! Retry/failover wrapper around a single [`crate::LlmClient`]: exponential
//! backoff with a capped ceiling, retrying only errors classified as
//! transient.

use crate::{LlmClient, LlmOptions, StreamEvent};
use async_trait::async_trait;
use stagecraft_core::{StagecraftError, StagecraftResult};
use tokio::sync::mpsc;

/// Retry tuning for [`RetryingLlmClient`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
        }
    }
}

/// Classifies a rendered error message as worth retrying. Checked in order:
/// an explicit 400 is never retryable even if another marker is present.
pub fn is_retryable(message: &str) -> bool {
    if message.contains("400") {
        return false;
    }
    const MARKERS: &[&str] = &[
        "429", "401", "timeout", "500", "502", "503", "504",
    ];
    MARKERS.iter().any(|m| message.contains(m))
}

fn compute_backoff(policy: &RetryPolicy, attempt: u32) -> u64 {
    let scaled = policy.backoff_base_ms.saturating_mul(1u64 << attempt.min(16));
    scaled.min(policy.backoff_max_ms)
}

/// Wraps an [`LlmClient`] with retries for transiently-failing calls.
pub struct RetryingLlmClient<C: LlmClient> {
    inner: C,
    policy: RetryPolicy,
    #[cfg(test)]
    sleep_fn: Option<Box<dyn Fn(u64) + Send + Sync>>,
}

impl<C: LlmClient> RetryingLlmClient<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            policy: RetryPolicy::default(),
            #[cfg(test)]
            sleep_fn: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn sleep(&self, ms: u64) {
        #[cfg(test)]
        if let Some(f) = &self.sleep_fn {
            f(ms);
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
    }
}

#[async_trait]
impl<C: LlmClient> LlmClient for RetryingLlmClient<C> {
    async fn complete(&self, prompt: &str, options: &LlmOptions) -> StagecraftResult<String> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(prompt, options).await {
                Ok(text) => return Ok(text),
                Err(err) => {
                    let message = err.to_string();
                    if attempt >= self.policy.max_retries || !is_retryable(&message) {
                        return Err(err);
                    }
                    self.sleep(compute_backoff(&self.policy, attempt)).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn complete_stream(
        &self,
        prompt: &str,
        options: &LlmOptions,
    ) -> StagecraftResult<mpsc::Receiver<StreamEvent>> {
        let mut attempt = 0;
        loop {
            match self.inner.complete_stream(prompt, options).await {
                Ok(rx) => return Ok(rx),
                Err(err) => {
                    let message = err.to_string();
                    if attempt >= self.policy.max_retries || !is_retryable(&message) {
                        return Err(err);
                    }
                    self.sleep(compute_backoff(&self.policy, attempt)).await;
                    attempt += 1;
                }
            }
        }
    }
}
