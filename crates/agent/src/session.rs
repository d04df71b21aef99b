use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use concierge_core::config::ModuleSelector;
use concierge_core::{AuditSink, NoopAuditSink, RegistryError, SessionId};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::llm::LlmClient;
use crate::registry::ModuleRegistry;
use crate::runtime::{
    AssistantReply, ConversationOrchestrator, FailureReport, OrchestratorSettings,
};

#[derive(Debug, Error)]
pub enum TurnError {
    /// The session could not be created because its module did not resolve.
    #[error(transparent)]
    Resolution(#[from] RegistryError),
    #[error(transparent)]
    Failed(#[from] FailureReport),
}

#[derive(Clone)]
struct SessionSlot {
    module: String,
    cancel: CancellationToken,
    orchestrator: Arc<Mutex<ConversationOrchestrator>>,
}

/// Owns every live session. Sessions share the registry and the LLM client;
/// turns within one session are serialized.
pub struct SessionManager {
    registry: Arc<ModuleRegistry>,
    selector: Arc<dyn ModuleSelector>,
    llm: Arc<dyn LlmClient>,
    settings: OrchestratorSettings,
    audit_sink: Arc<dyn AuditSink>,
    sessions: RwLock<HashMap<SessionId, SessionSlot>>,
}

impl SessionManager {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        selector: Arc<dyn ModuleSelector>,
        llm: Arc<dyn LlmClient>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            registry,
            selector,
            llm,
            settings,
            audit_sink: Arc::new(NoopAuditSink),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_audit_sink(mut self, audit_sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = audit_sink;
        self
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    /// Runs one user message through the session, creating it first if this
    /// is its first message. The active module is resolved only at creation.
    pub async fn run_turn(
        &self,
        session_id: &SessionId,
        user_message: &str,
    ) -> Result<AssistantReply, TurnError> {
        let slot = self.session(session_id).await?;
        let mut orchestrator = slot.orchestrator.lock().await;
        Ok(orchestrator.run_turn(user_message).await?)
    }

    /// Drops the session's history and cancels any turn still in flight.
    pub async fn end_session(&self, session_id: &SessionId) -> bool {
        let removed = self.sessions.write().await.remove(session_id);
        let Some(slot) = removed else {
            return false;
        };

        slot.cancel.cancel();
        info!(event_name = "session.ended", session_id = %session_id, "session ended");
        true
    }

    /// Drops sessions whose last turn finished more than `max_idle` ago.
    /// Sessions with a turn in flight are never evicted.
    pub async fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|session_id, slot| {
            let idle = match slot.orchestrator.try_lock() {
                Ok(orchestrator) => orchestrator.last_activity().elapsed() >= max_idle,
                Err(_) => false,
            };
            if idle {
                slot.cancel.cancel();
                info!(
                    event_name = "session.evicted",
                    session_id = %session_id,
                    module = %slot.module,
                    idle_secs = max_idle.as_secs(),
                    "idle session evicted"
                );
            }
            !idle
        });
        before - sessions.len()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn active_module(&self, session_id: &SessionId) -> Option<String> {
        self.sessions.read().await.get(session_id).map(|slot| slot.module.clone())
    }

    async fn session(&self, session_id: &SessionId) -> Result<SessionSlot, RegistryError> {
        if let Some(slot) = self.sessions.read().await.get(session_id) {
            return Ok(slot.clone());
        }

        let module = self.registry.resolve_active(self.selector.as_ref())?;
        let module_name = module.name().to_string();
        let cancel = CancellationToken::new();
        let orchestrator = ConversationOrchestrator::new(
            session_id.clone(),
            module,
            self.llm.clone(),
            self.settings,
        )
        .with_audit_sink(self.audit_sink.clone())
        .with_cancellation(cancel.clone());

        let mut sessions = self.sessions.write().await;
        let slot = sessions
            .entry(session_id.clone())
            .or_insert_with(|| {
                info!(
                    event_name = "session.created",
                    session_id = %session_id,
                    module = %module_name,
                    "session created"
                );
                SessionSlot {
                    module: module_name.clone(),
                    cancel,
                    orchestrator: Arc::new(Mutex::new(orchestrator)),
                }
            })
            .clone();
        Ok(slot)
    }
}
