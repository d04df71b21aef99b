use std::sync::Arc;

use concierge_agent::{
    LlmClient, LlmError, Module, ModuleRegistry, OpenRouterClient, OrchestratorSettings,
    SessionManager,
};
use concierge_core::config::{AppConfig, ConfigError, ModuleSelector};
use concierge_core::{AuditSink, RegistryError, TracingAuditSink};
use concierge_modules::{builtin_registry, module_context};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub sessions: Arc<SessionManager>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("module registry rejected startup: {0}")]
    Registry(#[from] RegistryError),
    #[error("llm client could not be built: {0}")]
    Llm(#[source] LlmError),
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let llm = OpenRouterClient::from_config(&config.llm).map_err(BootstrapError::Llm)?;
    info!(
        event_name = "system.bootstrap.llm_ready",
        correlation_id = "bootstrap",
        provider = config.llm.provider.as_str(),
        model = llm.model(),
        base_url = llm.base_url(),
        "llm client configured"
    );

    let registry = builtin_registry(module_context(&config.assistant))?;
    let selector = Arc::new(config.assistant.module_selector());
    assemble(config, registry, selector, Arc::new(llm), Arc::new(TracingAuditSink))
}

/// Wires a session manager from already-built parts. The active module is
/// resolved here once so a misconfigured `ACTIVE_MODULE` stops startup
/// instead of failing the first caller.
pub fn assemble(
    config: AppConfig,
    registry: ModuleRegistry,
    selector: Arc<dyn ModuleSelector>,
    llm: Arc<dyn LlmClient>,
    audit_sink: Arc<dyn AuditSink>,
) -> Result<Application, BootstrapError> {
    let active = registry.resolve_active(selector.as_ref())?;
    info!(
        event_name = "system.bootstrap.modules_registered",
        correlation_id = "bootstrap",
        modules = %registry.names().join(","),
        module = active.name(),
        "module registry ready"
    );

    let settings = OrchestratorSettings::from_config(&config);
    let sessions = SessionManager::new(Arc::new(registry), selector, llm, settings)
        .with_audit_sink(audit_sink);
    Ok(Application { config, sessions: Arc::new(sessions) })
}
