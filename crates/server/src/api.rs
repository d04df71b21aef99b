use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use concierge_agent::{AssistantReply, FailureReport, SessionManager, TurnError};
use concierge_core::{FailureReason, ModuleDescriptor, RegistryError, SessionId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::health;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionManager>,
}

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ModulesResponse<'a> {
    pub modules: Vec<&'a ModuleDescriptor>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Resolution(#[from] RegistryError),
    #[error(transparent)]
    SessionFailed(#[from] FailureReport),
}

impl From<TurnError> for ApiError {
    fn from(error: TurnError) -> Self {
        match error {
            TurnError::Resolution(error) => Self::Resolution(error),
            TurnError::Failed(report) => Self::SessionFailed(report),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            Self::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": { "kind": "bad_request", "message": message } }),
            ),
            Self::Resolution(error) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": { "kind": "module_resolution", "message": error.to_string() } }),
            ),
            Self::SessionFailed(report) => (
                failure_status(report.reason),
                json!({
                    "error": {
                        "kind": "session_failed",
                        "reason": report.reason.as_str(),
                        "message": report.message,
                    },
                    "session_id": report.session_id,
                    "transcript": report.transcript,
                }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

fn failure_status(reason: FailureReason) -> StatusCode {
    match reason {
        FailureReason::LlmService => StatusCode::BAD_GATEWAY,
        FailureReason::Timeout => StatusCode::GATEWAY_TIMEOUT,
        FailureReason::IterationLimitExceeded => StatusCode::UNPROCESSABLE_ENTITY,
        FailureReason::Cancelled => StatusCode::CONFLICT,
        FailureReason::InvalidTransition => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/sessions/{session_id}/messages", post(post_message))
        .route("/sessions/{session_id}", delete(end_session))
        .route("/modules", get(list_modules))
        .route("/health", get(health::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn post_message(
    Path(session_id): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<MessageRequest>,
) -> Result<Json<AssistantReply>, ApiError> {
    let message = body.message.trim();
    if message.is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".to_string()));
    }

    let correlation_id = Uuid::new_v4().simple().to_string();
    info!(
        event_name = "api.message.received",
        correlation_id = %correlation_id,
        session_id = %session_id,
        "user message received"
    );

    let session_id = SessionId(session_id);
    match state.sessions.run_turn(&session_id, message).await {
        Ok(reply) => Ok(Json(reply)),
        Err(error) => {
            warn!(
                event_name = "api.message.failed",
                correlation_id = %correlation_id,
                session_id = %session_id,
                error = %error,
                "turn did not complete"
            );
            Err(error.into())
        }
    }
}

async fn end_session(Path(session_id): Path<String>, State(state): State<AppState>) -> StatusCode {
    if state.sessions.end_session(&SessionId(session_id)).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn list_modules(State(state): State<AppState>) -> Response {
    let registry = state.sessions.registry();
    Json(ModulesResponse { modules: registry.descriptors() }).into_response()
}
