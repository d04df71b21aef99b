use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde::Serialize;

use crate::api::AppState;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub modules: HealthCheck,
    pub active_sessions: usize,
    pub checked_at: String,
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let modules = modules_check(&state);
    let ready = modules.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "concierge-server runtime initialized".to_string(),
        },
        modules,
        active_sessions: state.sessions.session_count().await,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn modules_check(state: &AppState) -> HealthCheck {
    let registry = state.sessions.registry();
    if registry.is_empty() {
        return HealthCheck { status: "degraded", detail: "no modules registered".to_string() };
    }

    HealthCheck {
        status: "ready",
        detail: format!("{} modules registered: {}", registry.len(), registry.names().join(", ")),
    }
}
