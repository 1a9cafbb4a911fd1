//! Completion gateway: one backend plus retry/backoff.
//!
//! Transient failures (network errors, timeouts, rate limits, backend
//! 5xx) are retried with exponential backoff; everything else propagates
//! immediately. When tools are registered, streaming is downgraded to a
//! buffered completion, since a tool-call decision cannot be safely
//! rendered incrementally.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::retry::RetryPolicy;
use crate::streaming::FragmentStream;
use crate::{Completion, CompletionBackend, LlmError, Message, ToolSpec};

/// A buffered completion plus the number of backend calls it took.
#[derive(Debug)]
pub struct GatewayResponse {
    pub completion: Completion,
    pub attempts: u32,
}

/// Result of a streaming request.
///
/// `Buffered` is the automatic downgrade taken when tools are registered;
/// the variant itself is how the gateway exposes the downgrade to callers.
pub enum StreamStart {
    Fragments(FragmentStream),
    Buffered(GatewayResponse),
}

pub struct CompletionGateway {
    backend: Arc<dyn CompletionBackend>,
    policy: RetryPolicy,
}

impl CompletionGateway {
    pub fn new(backend: Arc<dyn CompletionBackend>, policy: RetryPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` up to `budget` times, sleeping between transient failures.
    async fn run_with_retry<T, F, Fut>(&self, budget: u32, op: F) -> Result<(T, u32), LlmError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let budget = budget.max(1);
        let mut last_error: Option<LlmError> = None;

        for attempt in 0..budget {
            if attempt > 0 {
                let delay = self.policy.delay_for(attempt - 1);
                debug!(attempt = attempt + 1, ?delay, "retrying backend call");
                tokio::time::sleep(delay).await;
            }

            match op().await {
                Ok(value) => return Ok((value, attempt + 1)),
                Err(e) if e.is_transient() => {
                    warn!(attempt = attempt + 1, error = %e, "transient backend failure");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        let message = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts were made".to_string());
        Err(LlmError::CompletionFailed {
            attempts: budget,
            message,
        })
    }

    /// Buffered completion with the policy's full retry budget.
    pub async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
    ) -> Result<GatewayResponse, LlmError> {
        self.complete_with_budget(messages, tools, self.policy.max_retries)
            .await
    }

    /// Buffered completion with an explicit attempt budget (used by
    /// tool-call continuation round-trips under a shared budget).
    pub async fn complete_with_budget(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
        budget: u32,
    ) -> Result<GatewayResponse, LlmError> {
        let (completion, attempts) = self
            .run_with_retry(budget, || self.backend.complete(messages, tools))
            .await?;
        Ok(GatewayResponse {
            completion,
            attempts,
        })
    }

    /// Streaming completion.
    ///
    /// With tools registered the request is downgraded to a buffered
    /// completion (`StreamStart::Buffered`); retries cover only the
    /// initial connection, not fragments already in flight.
    pub async fn stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolSpec]>,
    ) -> Result<StreamStart, LlmError> {
        if let Some(tools) = tools.filter(|t| !t.is_empty()) {
            warn!("tools registered; streaming downgraded to buffered completion");
            let response = self.complete(messages, Some(tools)).await?;
            return Ok(StreamStart::Buffered(response));
        }

        let (stream, _) = self
            .run_with_retry(self.policy.max_retries, || {
                self.backend.complete_streaming(messages)
            })
            .await?;
        Ok(StreamStart::Fragments(stream))
    }

    /// Single-shot vision completion, retried like any buffered call.
    pub async fn analyze_image(&self, image: &[u8], prompt: &str) -> Result<String, LlmError> {
        let (text, _) = self
            .run_with_retry(self.policy.max_retries, || {
                self.backend.analyze_image(image, prompt)
            })
            .await?;
        Ok(text)
    }
}
