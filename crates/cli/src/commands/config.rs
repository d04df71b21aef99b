use std::env;
use std::fs;
use std::path::Path;

use concierge_core::config::{
    resolve_config_path, AppConfig, LoadOptions, ModuleSelector, ACTIVE_MODULE_ENV,
};
use toml::Value;

/// One effective setting and the env vars that may have supplied it, in
/// lookup order.
struct Setting {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Setting {
    fn new(
        key: &'static str,
        value: impl Into<String>,
        env_keys: &'static [&'static str],
    ) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for setting in settings(&config) {
        let source = field_source(
            setting.key,
            setting.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(setting.key, &setting.value, source));
    }

    let active = config.assistant.module_selector().active_module_name();
    let active_source = if env::var_os(ACTIVE_MODULE_ENV).is_some() {
        format!("env ({ACTIVE_MODULE_ENV})")
    } else {
        "assistant.default_module".to_string()
    };
    lines.push(render_line("active_module", &active, active_source));

    lines.join("\n")
}

fn settings(config: &AppConfig) -> Vec<Setting> {
    let assistant = &config.assistant;
    let llm = &config.llm;
    let api_key = if llm.api_key.is_some() { "<redacted>" } else { "<unset>" };

    vec![
        Setting::new(
            "assistant.default_module",
            &assistant.default_module,
            &["CONCIERGE_ASSISTANT_DEFAULT_MODULE"],
        ),
        Setting::new(
            "assistant.creator_name",
            assistant.creator_name.as_deref().unwrap_or("<unset>"),
            &["CONCIERGE_ASSISTANT_CREATOR_NAME"],
        ),
        Setting::new(
            "assistant.creator_contact",
            assistant.creator_contact.as_deref().unwrap_or("<unset>"),
            &["CONCIERGE_ASSISTANT_CREATOR_CONTACT"],
        ),
        Setting::new("llm.provider", llm.provider.as_str(), &["CONCIERGE_LLM_PROVIDER"]),
        Setting::new("llm.model", &llm.model, &["CONCIERGE_LLM_MODEL"]),
        Setting::new("llm.base_url", llm.effective_base_url(), &["CONCIERGE_LLM_BASE_URL"]),
        Setting::new("llm.api_key", api_key, &["CONCIERGE_LLM_API_KEY"]),
        Setting::new(
            "llm.timeout_secs",
            llm.timeout_secs.to_string(),
            &["CONCIERGE_LLM_TIMEOUT_SECS"],
        ),
        Setting::new(
            "llm.max_retries",
            llm.max_retries.to_string(),
            &["CONCIERGE_LLM_MAX_RETRIES"],
        ),
        Setting::new(
            "llm.retry_backoff_ms",
            llm.retry_backoff_ms.to_string(),
            &["CONCIERGE_LLM_RETRY_BACKOFF_MS"],
        ),
        Setting::new(
            "orchestrator.max_iterations",
            config.orchestrator.max_iterations.to_string(),
            &["CONCIERGE_ORCHESTRATOR_MAX_ITERATIONS"],
        ),
        Setting::new(
            "orchestrator.dispatch_concurrency",
            config.orchestrator.dispatch_concurrency.to_string(),
            &["CONCIERGE_ORCHESTRATOR_DISPATCH_CONCURRENCY"],
        ),
        Setting::new(
            "server.bind_address",
            &config.server.bind_address,
            &["CONCIERGE_SERVER_BIND_ADDRESS"],
        ),
        Setting::new("server.port", config.server.port.to_string(), &["CONCIERGE_SERVER_PORT"]),
        Setting::new(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["CONCIERGE_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        Setting::new(
            "server.session_idle_secs",
            config.server.session_idle_secs.to_string(),
            &["CONCIERGE_SERVER_SESSION_IDLE_SECS"],
        ),
        Setting::new(
            "logging.level",
            &config.logging.level,
            &["CONCIERGE_LOGGING_LEVEL", "CONCIERGE_LOG_LEVEL"],
        ),
        Setting::new(
            "logging.format",
            config.logging.format.as_str(),
            &["CONCIERGE_LOGGING_FORMAT", "CONCIERGE_LOG_FORMAT"],
        ),
    ]
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
