//! Bounded exponential backoff around any [`LlmClient`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::llm::{ChatRequest, LlmClient, LlmError};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Retries transient failures; everything else is returned as-is.
pub struct Retrying {
    inner: Arc<dyn LlmClient>,
    policy: RetryPolicy,
}

impl Retrying {
    pub fn new(inner: Arc<dyn LlmClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl LlmClient for Retrying {
    async fn complete(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.inner.complete(request).await {
                Ok(text) => return Ok(text),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.delay_after(attempt);
                    warn!("LLM attempt {attempt}/{max_attempts} failed: {e}; retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_transient() {
                        warn!("LLM gave up after {attempt} attempt(s): {e}");
                    }
                    return Err(e);
                }
            }
        }
    }
}
