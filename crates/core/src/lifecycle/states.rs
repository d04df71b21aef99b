use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    IterationLimitExceeded,
    LlmService,
    Timeout,
    Cancelled,
    InvalidTransition,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IterationLimitExceeded => "iteration_limit_exceeded",
            Self::LlmService => "llm_service",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::InvalidTransition => "invalid_transition",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum SessionState {
    Idle,
    AwaitingLlm,
    Dispatching,
    Completed,
    Failed(FailureReason),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    UserMessageReceived,
    TextReplyReceived,
    FunctionCallsReceived,
    ResultsCollected,
    Failed(FailureReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: SessionState,
    pub to: SessionState,
    pub event: SessionEvent,
}
