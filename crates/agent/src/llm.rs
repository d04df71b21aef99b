use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use concierge_core::{FunctionCallRequest, FunctionSpec, Turn};
use thiserror::Error;

/// Everything the model sees for one completion.
#[derive(Clone, Copy, Debug)]
pub struct LlmRequest<'a> {
    pub system_prompt: &'a str,
    pub messages: &'a [Turn],
    pub functions: &'a [FunctionSpec],
}

#[derive(Clone, Debug, PartialEq)]
pub enum LlmReply {
    Text(String),
    FunctionCalls { text: Option<String>, calls: Vec<FunctionCallRequest> },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("llm call timed out after {0:?}")]
    Timeout(Duration),
    #[error("llm transport error: {0}")]
    Transport(String),
    #[error("llm rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("llm api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("llm returned an invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// Client errors and malformed responses fail the turn immediately;
    /// everything else is worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Transport(_) | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            Self::InvalidResponse(_) => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: LlmRequest<'_>) -> Result<LlmReply, LlmError>;
}

/// Retry budget for one LLM call. Backoff doubles per attempt starting from
/// `base_backoff`; a server-provided `Retry-After` wins when present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self { max_retries, base_backoff }
    }

    pub fn none() -> Self {
        Self { max_retries: 0, base_backoff: Duration::ZERO }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32, error: &LlmError) -> Duration {
        if let Some(retry_after) = error.retry_after() {
            return retry_after;
        }
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_backoff.saturating_mul(1_u32 << exponent)
    }
}

/// Replays a fixed script of replies. Used for offline runs and tests; an
/// exhausted script answers with `InvalidResponse`.
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<LlmReply, LlmError>>>,
    repeat_last: Option<LlmReply>,
    calls: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedLlmClient {
    pub fn new(script: Vec<Result<LlmReply, LlmError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat_last: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Answers every call with `reply` once the script runs out.
    pub fn repeating(mut self, reply: LlmReply) -> Self {
        self.repeat_last = Some(reply);
        self
    }

    pub fn call_count(&self) -> usize {
        self.recorded().len()
    }

    /// History snapshots passed to each `complete` call, in call order.
    pub fn recorded(&self) -> Vec<Vec<Turn>> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: LlmRequest<'_>) -> Result<LlmReply, LlmError> {
        match self.calls.lock() {
            Ok(mut calls) => calls.push(request.messages.to_vec()),
            Err(poisoned) => poisoned.into_inner().push(request.messages.to_vec()),
        }

        let next = match self.script.lock() {
            Ok(mut script) => script.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };

        match (next, &self.repeat_last) {
            (Some(reply), _) => reply,
            (None, Some(reply)) => Ok(reply.clone()),
            (None, None) => Err(LlmError::InvalidResponse("script exhausted".to_string())),
        }
    }
}
