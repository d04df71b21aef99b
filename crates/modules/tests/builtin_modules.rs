use std::collections::HashSet;
use std::env;
use std::sync::{Arc, Mutex, OnceLock};

use concierge_agent::{
    DispatchEngine, LlmReply, Module, ModuleContext, OrchestratorSettings, ScriptedLlmClient,
    SessionManager,
};
use concierge_core::config::{EnvModuleSelector, StaticModuleSelector, ACTIVE_MODULE_ENV};
use concierge_core::{AuditContext, FunctionCallRequest, SessionId, Turn};
use concierge_modules::{builtin_registry, hospital, hotel, internet_sales};
use serde_json::{json, Value};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

fn env_lock() -> &'static Mutex<()> {
    ENV_LOCK.get_or_init(|| Mutex::new(()))
}

fn audit(module: &str) -> AuditContext {
    AuditContext::new(None, Some(module.to_string()), "req-1", "test")
}

fn context() -> ModuleContext {
    ModuleContext {
        creator_name: Some("Ada Operator".to_string()),
        creator_contact: Some("ada@example.com".to_string()),
    }
}

#[test]
fn registry_holds_every_builtin_module() {
    let registry = builtin_registry(context()).expect("registry builds");

    assert_eq!(registry.names(), vec![hospital::NAME, hotel::NAME, internet_sales::NAME]);
}

#[test]
fn function_names_are_unique_within_each_module() {
    let registry = builtin_registry(context()).expect("registry builds");

    for descriptor in registry.descriptors() {
        let names = descriptor.function_names();
        let unique: HashSet<&str> = names.iter().copied().collect();
        assert_eq!(unique.len(), names.len(), "duplicate function in {}", descriptor.name());
        assert!(descriptor.function("get_creator_info").is_some());
        assert!(!descriptor.system_prompt().is_empty());
    }
}

#[tokio::test]
async fn hotel_availability_content_reaches_the_model_unmodified() {
    let registry = builtin_registry(context()).expect("registry builds");
    let module = registry.resolve(hotel::NAME).expect("hotel registered");
    let engine = DispatchEngine::new(Arc::clone(&module));
    let request = FunctionCallRequest::new(
        "call_1",
        "check_room_availability",
        json!({ "date": "2024-01-01", "roomType": "double" }),
    );
    let arguments = request.arguments.as_object().cloned().unwrap_or_default();
    let direct = module
        .execute_function("check_room_availability", &arguments)
        .await
        .expect("direct call succeeds");

    let result = engine.dispatch(&request, &audit(hotel::NAME)).await;

    assert!(!result.is_error());
    assert_eq!(result.call_id.as_str(), "call_1");
    assert_eq!(result.content, direct);
    let payload: Value = serde_json::from_str(&result.content).expect("json content");
    assert_eq!(payload["available"], Value::Bool(true));
}

#[tokio::test]
async fn creator_info_comes_from_the_registry_context() {
    let registry = builtin_registry(context()).expect("registry builds");
    let engine = DispatchEngine::new(registry.resolve(internet_sales::NAME).expect("module"));
    let request = FunctionCallRequest::new("c-9", "get_creator_info", json!({}));

    let result = engine.dispatch(&request, &audit(internet_sales::NAME)).await;

    let payload: Value = serde_json::from_str(&result.content).expect("json content");
    assert_eq!(payload["name"], "Ada Operator");
    assert_eq!(payload["contact"], "ada@example.com");
}

#[test]
fn active_module_env_beats_the_configured_default() {
    let _guard = env_lock().lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let registry = builtin_registry(context()).expect("registry builds");
    let selector = EnvModuleSelector::new(hospital::NAME);

    env::set_var(ACTIVE_MODULE_ENV, "hotel");
    let active = registry.resolve_active(&selector).map(|module| module.name().to_string());
    env::remove_var(ACTIVE_MODULE_ENV);
    let fallback = registry.resolve_active(&selector).map(|module| module.name().to_string());

    assert_eq!(active.expect("hotel resolves"), "hotel");
    assert_eq!(fallback.expect("hospital resolves"), "hospital");
}

#[tokio::test]
async fn bookings_are_shared_between_sessions() {
    let registry = builtin_registry(context()).expect("registry builds");
    let booking = json!({
        "patient": "Sam Reyes",
        "doctor": "Dr. Haddad",
        "date": "2024-07-03",
        "time": "15:00",
    });
    let llm = Arc::new(
        ScriptedLlmClient::new(vec![
            Ok(LlmReply::FunctionCalls {
                text: None,
                calls: vec![FunctionCallRequest::new("b-1", "book_appointment", booking.clone())],
            }),
            Ok(LlmReply::Text("You are booked.".to_string())),
            Ok(LlmReply::FunctionCalls {
                text: None,
                calls: vec![FunctionCallRequest::new("b-1", "book_appointment", booking)],
            }),
            Ok(LlmReply::Text("That slot is taken.".to_string())),
        ]),
    );
    let manager = SessionManager::new(
        Arc::new(registry),
        Arc::new(StaticModuleSelector(hospital::NAME.to_string())),
        llm.clone(),
        OrchestratorSettings::default(),
    );

    let first = manager
        .run_turn(&SessionId("caller-1".to_string()), "book Dr. Haddad")
        .await
        .expect("first session");
    let second = manager
        .run_turn(&SessionId("caller-2".to_string()), "book Dr. Haddad too")
        .await
        .expect("second session");

    assert_eq!(first.text, "You are booked.");
    assert_eq!(second.text, "That slot is taken.");
    let recorded = llm.recorded();
    let Some(Turn::FunctionResult { result }) = recorded[3].last() else {
        panic!("expected a function result before the final reply");
    };
    assert!(result.is_error());
    assert!(result.content.contains("already booked"));
}
