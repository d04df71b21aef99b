use std::sync::Arc;
use std::time::Duration;

use concierge_core::audit::{AuditCategory, AuditOutcome};
use concierge_core::config::AppConfig;
use concierge_core::lifecycle::LifecycleError;
use concierge_core::{
    AuditContext, AuditEvent, AuditSink, FailureReason, NoopAuditSink, SessionEvent, SessionId,
    SessionLifecycle, SessionState, Turn,
};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::dispatch::DispatchEngine;
use crate::llm::{LlmClient, LlmError, LlmReply, LlmRequest, RetryPolicy};
use crate::module::Module;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// LLM calls allowed per user message.
    pub max_iterations: u32,
    pub llm_timeout: Duration,
    pub retry: RetryPolicy,
    pub dispatch_concurrency: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            llm_timeout: Duration::from_secs(30),
            retry: RetryPolicy::new(3, Duration::from_millis(2_000)),
            dispatch_concurrency: 4,
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_iterations: config.orchestrator.max_iterations,
            llm_timeout: Duration::from_secs(config.llm.timeout_secs),
            retry: RetryPolicy::new(
                config.llm.max_retries,
                Duration::from_millis(config.llm.retry_backoff_ms),
            ),
            dispatch_concurrency: config.orchestrator.dispatch_concurrency,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AssistantReply {
    pub session_id: SessionId,
    pub module: String,
    pub text: String,
    pub llm_calls: u32,
}

/// Session-fatal outcome of a turn. The transcript holds everything appended
/// before the failure, including executed calls and their results.
#[derive(Clone, Debug, PartialEq, Error, Serialize)]
#[error("session `{session_id}` failed ({}): {message}", reason.as_str())]
pub struct FailureReport {
    pub session_id: SessionId,
    pub reason: FailureReason,
    pub message: String,
    pub transcript: Vec<Turn>,
}

struct TurnFailure {
    reason: FailureReason,
    message: String,
}

impl TurnFailure {
    fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self { reason, message: message.into() }
    }
}

impl From<LifecycleError> for TurnFailure {
    fn from(error: LifecycleError) -> Self {
        Self::new(FailureReason::InvalidTransition, error.to_string())
    }
}

/// Drives one session's turn loop between the model and the active module.
pub struct ConversationOrchestrator {
    session_id: SessionId,
    module: Arc<dyn Module>,
    llm: Arc<dyn LlmClient>,
    dispatcher: DispatchEngine,
    settings: OrchestratorSettings,
    lifecycle: SessionLifecycle,
    state: SessionState,
    history: Vec<Turn>,
    audit_sink: Arc<dyn AuditSink>,
    cancel: CancellationToken,
    last_activity: Instant,
}

impl ConversationOrchestrator {
    pub fn new(
        session_id: SessionId,
        module: Arc<dyn Module>,
        llm: Arc<dyn LlmClient>,
        settings: OrchestratorSettings,
    ) -> Self {
        let dispatcher =
            DispatchEngine::new(module.clone()).with_concurrency(settings.dispatch_concurrency);
        let lifecycle = SessionLifecycle;

        Self {
            session_id,
            module,
            llm,
            dispatcher,
            settings,
            state: lifecycle.initial_state(),
            lifecycle,
            history: Vec::new(),
            audit_sink: Arc::new(NoopAuditSink),
            cancel: CancellationToken::new(),
            last_activity: Instant::now(),
        }
    }

    pub fn with_audit_sink(mut self, audit_sink: Arc<dyn AuditSink>) -> Self {
        self.dispatcher = self.dispatcher.with_audit_sink(audit_sink.clone());
        self.audit_sink = audit_sink;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// When the last turn finished, or construction time before any turn.
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub async fn run_turn(&mut self, user_message: &str) -> Result<AssistantReply, FailureReport> {
        let audit = AuditContext::new(
            Some(self.session_id.clone()),
            Some(self.module.name().to_string()),
            Uuid::new_v4().to_string(),
            "orchestrator",
        );

        if !matches!(self.state, SessionState::Idle) && !self.state.is_terminal() {
            warn!(
                event_name = "session.interrupted_turn_reset",
                correlation_id = %audit.correlation_id,
                session_id = %self.session_id,
                state = ?self.state,
                "previous turn did not finish; resetting to idle"
            );
            self.state = SessionState::Idle;
        }

        info!(
            event_name = "session.turn_started",
            correlation_id = %audit.correlation_id,
            session_id = %self.session_id,
            module = %self.module.name(),
            "turn started"
        );

        let mut llm_calls = 0;
        let outcome = self.drive(user_message, &audit, &mut llm_calls).await;
        self.last_activity = Instant::now();
        match outcome {
            Ok(text) => {
                info!(
                    event_name = "session.turn_completed",
                    correlation_id = %audit.correlation_id,
                    session_id = %self.session_id,
                    llm_calls,
                    "turn completed"
                );
                Ok(AssistantReply {
                    session_id: self.session_id.clone(),
                    module: self.module.name().to_string(),
                    text,
                    llm_calls,
                })
            }
            Err(failure) => {
                let event = SessionEvent::Failed(failure.reason);
                if let Err(error) = self.advance(event, &audit) {
                    error!(
                        event_name = "session.failure_transition_rejected",
                        correlation_id = %audit.correlation_id,
                        session_id = %self.session_id,
                        error = %error,
                        "could not record failure transition"
                    );
                    self.state = SessionState::Failed(failure.reason);
                }
                warn!(
                    event_name = "session.turn_failed",
                    correlation_id = %audit.correlation_id,
                    session_id = %self.session_id,
                    reason = failure.reason.as_str(),
                    llm_calls,
                    message = %failure.message,
                    "turn failed"
                );
                Err(FailureReport {
                    session_id: self.session_id.clone(),
                    reason: failure.reason,
                    message: failure.message,
                    transcript: self.history.clone(),
                })
            }
        }
    }

    async fn drive(
        &mut self,
        user_message: &str,
        audit: &AuditContext,
        llm_calls: &mut u32,
    ) -> Result<String, TurnFailure> {
        self.history.push(Turn::user(user_message));
        self.advance(SessionEvent::UserMessageReceived, audit)?;

        loop {
            if *llm_calls >= self.settings.max_iterations {
                return Err(TurnFailure::new(
                    FailureReason::IterationLimitExceeded,
                    format!("no final answer after {} llm calls", self.settings.max_iterations),
                ));
            }
            if self.cancel.is_cancelled() {
                return Err(cancelled());
            }

            *llm_calls += 1;
            let reply = self.complete_with_retry(audit).await?;

            let (text, calls) = match reply {
                LlmReply::Text(text) => (Some(text), Vec::new()),
                LlmReply::FunctionCalls { text, calls } => (text, calls),
            };

            if calls.is_empty() {
                let text = text.ok_or_else(|| {
                    TurnFailure::new(FailureReason::LlmService, "llm reply was empty")
                })?;
                self.history.push(Turn::assistant(text.clone()));
                self.advance(SessionEvent::TextReplyReceived, audit)?;
                return Ok(text);
            }

            self.advance(SessionEvent::FunctionCallsReceived, audit)?;
            if self.cancel.is_cancelled() {
                return Err(cancelled());
            }

            let results = self.dispatcher.dispatch_batch(&calls, audit).await;
            self.history.push(Turn::FunctionCalls { text, calls });
            self.history.extend(results.into_iter().map(|result| Turn::FunctionResult { result }));
            self.advance(SessionEvent::ResultsCollected, audit)?;
        }
    }

    async fn complete_with_retry(&self, audit: &AuditContext) -> Result<LlmReply, TurnFailure> {
        let retry = self.settings.retry;
        let mut attempt = 0;

        loop {
            let request = LlmRequest {
                system_prompt: self.module.system_prompt(),
                messages: &self.history,
                functions: self.module.functions(),
            };

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(cancelled()),
                outcome = tokio::time::timeout(
                    self.settings.llm_timeout,
                    self.llm.complete(request),
                ) => outcome,
            };
            let error = match outcome {
                Ok(Ok(reply)) => return Ok(reply),
                Ok(Err(error)) => error,
                Err(_) => LlmError::Timeout(self.settings.llm_timeout),
            };

            if !error.is_retryable() || attempt >= retry.max_retries {
                let reason = match error {
                    LlmError::Timeout(_) => FailureReason::Timeout,
                    _ => FailureReason::LlmService,
                };
                self.emit_llm("llm.call_failed", attempt, &error, audit);
                return Err(TurnFailure::new(reason, error.to_string()));
            }

            attempt += 1;
            let delay = retry.delay_for(attempt, &error);
            self.emit_llm("llm.retry_scheduled", attempt, &error, audit);
            warn!(
                event_name = "llm.retry_scheduled",
                correlation_id = %audit.correlation_id,
                session_id = %self.session_id,
                client = self.llm.name(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying llm call"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn emit_llm(&self, event_type: &str, attempt: u32, error: &LlmError, audit: &AuditContext) {
        self.audit_sink.emit(
            AuditEvent::new(
                audit.session_id.clone(),
                audit.module.clone(),
                audit.correlation_id.clone(),
                event_type,
                AuditCategory::Llm,
                audit.actor.clone(),
                AuditOutcome::Failed,
            )
            .with_metadata("client", self.llm.name())
            .with_metadata("attempt", attempt.to_string())
            .with_metadata("error", error.to_string()),
        );
    }

    fn advance(&mut self, event: SessionEvent, audit: &AuditContext) -> Result<(), LifecycleError> {
        let outcome =
            self.lifecycle.apply_with_audit(&self.state, &event, self.audit_sink.as_ref(), audit)?;
        self.state = outcome.to;
        Ok(())
    }
}

fn cancelled() -> TurnFailure {
    TurnFailure::new(FailureReason::Cancelled, "session was cancelled")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use concierge_core::audit::AuditCategory;
    use concierge_core::{
        FailureReason, FunctionCallRequest, FunctionError, FunctionSpec, InMemoryAuditSink,
        ModuleDescriptor, ParameterSchema, ParameterType, SessionId, SessionState, Turn,
    };
    use serde_json::{json, Map, Value};
    use tokio_util::sync::CancellationToken;

    use super::{ConversationOrchestrator, OrchestratorSettings};
    use crate::llm::{LlmClient, LlmError, LlmReply, LlmRequest, RetryPolicy, ScriptedLlmClient};
    use crate::module::Module;

    struct PackageDesk {
        descriptor: ModuleDescriptor,
        invocations: AtomicUsize,
        hang_up: Option<CancellationToken>,
    }

    impl PackageDesk {
        fn new() -> Arc<Self> {
            Arc::new(Self::build(None))
        }

        /// Cancels `token` from inside its first function call.
        fn hanging_up(token: CancellationToken) -> Arc<Self> {
            Arc::new(Self::build(Some(token)))
        }

        fn build(hang_up: Option<CancellationToken>) -> Self {
            let descriptor = ModuleDescriptor::new(
                "internet_sales",
                "Internet sales desk",
                "You sell internet packages.",
                vec![FunctionSpec::new(
                    "query_packages",
                    "Search packages",
                    ParameterSchema::object().required("query", ParameterType::String, "Keyword"),
                )],
            )
            .expect("descriptor builds");
            Self { descriptor, invocations: AtomicUsize::new(0), hang_up }
        }
    }

    #[async_trait]
    impl Module for PackageDesk {
        fn descriptor(&self) -> &ModuleDescriptor {
            &self.descriptor
        }

        async fn execute_function(
            &self,
            name: &str,
            arguments: &Map<String, Value>,
        ) -> Result<String, FunctionError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            if let Some(token) = &self.hang_up {
                token.cancel();
            }
            match name {
                "query_packages" => Ok(json!({
                    "query": arguments.get("query"),
                    "packages": [{"name": "Fiber 300", "price": 39}],
                })
                .to_string()),
                other => Err(FunctionError::unknown(other)),
            }
        }
    }

    struct StalledLlm;

    #[async_trait]
    impl LlmClient for StalledLlm {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn complete(&self, _request: LlmRequest<'_>) -> Result<LlmReply, LlmError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(LlmReply::Text("too late".to_string()))
        }
    }

    fn settings(max_iterations: u32, max_retries: u32) -> OrchestratorSettings {
        OrchestratorSettings {
            max_iterations,
            llm_timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(max_retries, Duration::from_millis(1)),
            dispatch_concurrency: 2,
        }
    }

    fn query_call(id: &str) -> FunctionCallRequest {
        FunctionCallRequest::new(id, "query_packages", json!({"query": "fiber"}))
    }

    fn orchestrator(
        llm: Arc<dyn LlmClient>,
        settings: OrchestratorSettings,
    ) -> (Arc<PackageDesk>, ConversationOrchestrator) {
        let module = PackageDesk::new();
        let orchestrator = ConversationOrchestrator::new(
            SessionId("sess-1".to_string()),
            module.clone(),
            llm,
            settings,
        );
        (module, orchestrator)
    }

    #[tokio::test]
    async fn plain_text_reply_completes_after_one_llm_call() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(LlmReply::Text("Hi!".to_string()))]));
        let (module, mut orchestrator) = orchestrator(llm.clone(), settings(8, 0));

        let reply = orchestrator.run_turn("hello").await.expect("turn completes");

        assert_eq!(reply.text, "Hi!");
        assert_eq!(reply.llm_calls, 1);
        assert_eq!(llm.call_count(), 1);
        assert_eq!(orchestrator.state(), SessionState::Completed);
        assert_eq!(orchestrator.history(), &[Turn::user("hello"), Turn::assistant("Hi!")]);
        assert_eq!(module.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn function_results_are_fed_back_in_call_order() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(LlmReply::FunctionCalls {
                text: Some("Let me check.".to_string()),
                calls: vec![
                    query_call("call-1"),
                    FunctionCallRequest::new("call-2", "cancel_contract", json!({})),
                    query_call("call-3"),
                ],
            }),
            Ok(LlmReply::Text("Fiber 300 is 39 a month.".to_string())),
        ]));
        let (module, mut orchestrator) = orchestrator(llm.clone(), settings(8, 0));

        let reply = orchestrator.run_turn("what fiber plans exist?").await.expect("completes");

        assert_eq!(reply.llm_calls, 2);
        assert_eq!(module.invocations.load(Ordering::SeqCst), 2);

        let history = orchestrator.history();
        assert_eq!(history.len(), 6);
        let result_ids: Vec<&str> = history
            .iter()
            .filter_map(|turn| match turn {
                Turn::FunctionResult { result } => Some(result.call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(result_ids, vec!["call-1", "call-2", "call-3"]);

        let recorded = llm.recorded();
        let second_call = &recorded[1];
        assert_eq!(second_call.len(), 5);
        assert!(matches!(second_call[1], Turn::FunctionCalls { .. }));
    }

    #[tokio::test]
    async fn endless_function_calls_hit_the_iteration_limit() {
        let llm = Arc::new(ScriptedLlmClient::new(Vec::new()).repeating(LlmReply::FunctionCalls {
            text: None,
            calls: vec![query_call("call-loop")],
        }));
        let (module, mut orchestrator) = orchestrator(llm.clone(), settings(3, 0));

        let report = orchestrator.run_turn("loop forever").await.expect_err("turn fails");

        assert_eq!(report.reason, FailureReason::IterationLimitExceeded);
        assert_eq!(llm.call_count(), 3);
        assert_eq!(
            orchestrator.state(),
            SessionState::Failed(FailureReason::IterationLimitExceeded)
        );
        assert_eq!(module.invocations.load(Ordering::SeqCst), 3);
        assert!(!report.transcript.is_empty());
        assert_eq!(report.transcript[0], Turn::user("loop forever"));
    }

    #[tokio::test]
    async fn call_ids_reused_by_a_later_response_still_execute() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(LlmReply::FunctionCalls { text: None, calls: vec![query_call("call_0")] }),
            Ok(LlmReply::FunctionCalls {
                text: None,
                calls: vec![FunctionCallRequest::new(
                    "call_0",
                    "query_packages",
                    json!({"query": "dsl"}),
                )],
            }),
            Ok(LlmReply::Text("Fiber or DSL, your pick.".to_string())),
        ]));
        let (module, mut orchestrator) = orchestrator(llm.clone(), settings(8, 0));

        let reply = orchestrator.run_turn("compare fiber and dsl").await.expect("completes");

        assert_eq!(reply.llm_calls, 3);
        assert_eq!(module.invocations.load(Ordering::SeqCst), 2);
        let results: Vec<_> = orchestrator
            .history()
            .iter()
            .filter_map(|turn| match turn {
                Turn::FunctionResult { result } => Some(result),
                _ => None,
            })
            .collect();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|result| !result.is_error()));
        assert!(results[1].content.contains("dsl"));
    }

    #[tokio::test]
    async fn retryable_errors_are_retried_until_success() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::Transport("connection reset".to_string())),
            Err(LlmError::Api { status: 502, message: "bad gateway".to_string() }),
            Ok(LlmReply::Text("Recovered.".to_string())),
        ]));
        let (_, mut orchestrator) = orchestrator(llm.clone(), settings(8, 3));

        let reply = orchestrator.run_turn("hi").await.expect("turn completes after retries");

        assert_eq!(reply.text, "Recovered.");
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_turn() {
        let limited = || LlmError::RateLimited { retry_after: Some(Duration::from_millis(1)) };
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Err(limited()),
            Err(limited()),
            Err(limited()),
            Ok(LlmReply::Text("never reached".to_string())),
        ]));
        let (_, mut orchestrator) = orchestrator(llm.clone(), settings(8, 2));

        let report = orchestrator.run_turn("hi").await.expect_err("turn fails");

        assert_eq!(report.reason, FailureReason::LlmService);
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn llm_retries_and_failures_are_audited() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::Transport("connection reset".to_string())),
            Err(LlmError::Api { status: 401, message: "bad key".to_string() }),
        ]));
        let sink = InMemoryAuditSink::default();
        let (_, orchestrator) = orchestrator(llm.clone(), settings(8, 3));
        let mut orchestrator = orchestrator.with_audit_sink(Arc::new(sink.clone()));

        orchestrator.run_turn("hi").await.expect_err("turn fails");

        assert_eq!(sink.count("llm.retry_scheduled"), 1);
        assert_eq!(sink.count("llm.call_failed"), 1);
        let failed = sink
            .events()
            .into_iter()
            .find(|event| event.event_type == "llm.call_failed")
            .expect("failure event");
        assert_eq!(failed.category, AuditCategory::Llm);
        assert_eq!(failed.session_id, Some(SessionId("sess-1".to_string())));
        assert_eq!(failed.metadata.get("attempt").map(String::as_str), Some("1"));
        assert!(failed.metadata.get("error").is_some_and(|error| error.contains("bad key")));
    }

    #[tokio::test]
    async fn client_errors_fail_without_retry() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Err(LlmError::Api {
            status: 400,
            message: "tools not supported".to_string(),
        })]));
        let (_, mut orchestrator) = orchestrator(llm.clone(), settings(8, 3));

        let report = orchestrator.run_turn("hi").await.expect_err("turn fails");

        assert_eq!(report.reason, FailureReason::LlmService);
        assert!(report.message.contains("tools not supported"));
        assert_eq!(llm.call_count(), 1);
    }

    #[tokio::test]
    async fn slow_llm_times_out() {
        let mut settings = settings(8, 0);
        settings.llm_timeout = Duration::from_millis(20);
        let (_, mut orchestrator) = orchestrator(Arc::new(StalledLlm), settings);

        let report = orchestrator.run_turn("hi").await.expect_err("turn times out");

        assert_eq!(report.reason, FailureReason::Timeout);
        assert_eq!(orchestrator.state(), SessionState::Failed(FailureReason::Timeout));
    }

    #[tokio::test]
    async fn cancelled_session_never_calls_the_llm() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![Ok(LlmReply::Text("Hi".to_string()))]));
        let (_, mut orchestrator) = orchestrator(llm.clone(), settings(8, 0));
        orchestrator.cancellation_token().cancel();

        let report = orchestrator.run_turn("hi").await.expect_err("turn is cancelled");

        assert_eq!(report.reason, FailureReason::Cancelled);
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_during_dispatch_stops_before_the_next_llm_call() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Ok(LlmReply::FunctionCalls { text: None, calls: vec![query_call("call-1")] }),
            Ok(LlmReply::Text("never reached".to_string())),
        ]));
        let token = CancellationToken::new();
        let module = PackageDesk::hanging_up(token.clone());
        let mut orchestrator = ConversationOrchestrator::new(
            SessionId("sess-2".to_string()),
            module.clone(),
            llm.clone(),
            settings(8, 0),
        )
        .with_cancellation(token);

        let report = orchestrator.run_turn("fiber please").await.expect_err("cancelled");

        assert_eq!(report.reason, FailureReason::Cancelled);
        assert_eq!(llm.call_count(), 1);
        assert_eq!(module.invocations.load(Ordering::SeqCst), 1);
        assert_eq!(orchestrator.state(), SessionState::Failed(FailureReason::Cancelled));
        assert!(matches!(report.transcript.last(), Some(Turn::FunctionResult { .. })));
    }

    #[tokio::test]
    async fn session_accepts_new_messages_after_a_failure() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Err(LlmError::InvalidResponse("no choices".to_string())),
            Ok(LlmReply::Text("Back again.".to_string())),
        ]));
        let sink = InMemoryAuditSink::default();
        let (_, orchestrator) = orchestrator(llm.clone(), settings(8, 0));
        let mut orchestrator = orchestrator.with_audit_sink(Arc::new(sink.clone()));

        orchestrator.run_turn("first").await.expect_err("first turn fails");
        let reply = orchestrator.run_turn("second").await.expect("second turn completes");

        assert_eq!(reply.text, "Back again.");
        assert_eq!(orchestrator.state(), SessionState::Completed);
        assert_eq!(orchestrator.history().len(), 3);
        assert_eq!(sink.count("session.transition_rejected"), 0);
        assert!(sink.count("session.transition_applied") >= 4);
    }
}
