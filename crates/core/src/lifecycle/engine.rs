use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::lifecycle::states::{SessionEvent, SessionState, TransitionOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("invalid session transition from {state:?} using event {event:?}")]
    InvalidTransition { state: SessionState, event: SessionEvent },
}

/// Turn-loop state machine: `Idle -> AwaitingLlm -> (Completed | Dispatching)`,
/// then `Dispatching -> AwaitingLlm` until the turn ends in `Completed` or `Failed`.
/// A finished turn (`Completed` or `Failed`) accepts the next user message.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionLifecycle;

impl SessionLifecycle {
    pub fn initial_state(&self) -> SessionState {
        SessionState::Idle
    }

    pub fn apply(
        &self,
        current: &SessionState,
        event: &SessionEvent,
    ) -> Result<TransitionOutcome, LifecycleError> {
        use SessionEvent::{
            Failed, FunctionCallsReceived, ResultsCollected, TextReplyReceived,
            UserMessageReceived,
        };
        use SessionState::{AwaitingLlm, Completed, Dispatching, Idle};

        let to = match (current, event) {
            (Idle, UserMessageReceived)
            | (Completed, UserMessageReceived)
            | (SessionState::Failed(_), UserMessageReceived) => AwaitingLlm,
            (AwaitingLlm, TextReplyReceived) => Completed,
            (AwaitingLlm, FunctionCallsReceived) => Dispatching,
            (Dispatching, ResultsCollected) => AwaitingLlm,
            (AwaitingLlm, Failed(reason)) | (Dispatching, Failed(reason)) => {
                SessionState::Failed(*reason)
            }
            _ => {
                return Err(LifecycleError::InvalidTransition { state: *current, event: *event });
            }
        };

        Ok(TransitionOutcome { from: *current, to, event: *event })
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &SessionState,
        event: &SessionEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, LifecycleError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                let outcome_kind = match outcome.to {
                    SessionState::Failed(_) => AuditOutcome::Failed,
                    _ => AuditOutcome::Success,
                };
                sink.emit(
                    AuditEvent::new(
                        audit.session_id.clone(),
                        audit.module.clone(),
                        audit.correlation_id.clone(),
                        "session.transition_applied",
                        AuditCategory::Session,
                        audit.actor.clone(),
                        outcome_kind,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.session_id.clone(),
                        audit.module.clone(),
                        audit.correlation_id.clone(),
                        "session.transition_rejected",
                        AuditCategory::Session,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}
