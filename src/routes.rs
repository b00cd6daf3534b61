//! HTTP control surface used by the admissions dashboard.

use std::path::Path;
use std::sync::Arc;

use axum::extract::{Path as UrlPath, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use uuid::Uuid;

use crate::channels::Channel;
use crate::error::ConfigError;
use crate::intake::responder::status_notice;
use crate::store::Database;

/// Shared state for the control routes.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub channel: Arc<dyn Channel>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub user_id: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub message: Option<String>,
    pub status: Option<String>,
}

const DEFAULT_STATUS: &str = "approved";

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

/// Trimmed, non-empty value of an optional request field.
fn required(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// GET /
async fn index() -> &'static str {
    "PPDB intake bot is running"
}

/// GET /health
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let connected = state.channel.health_check().await.is_ok();
    Json(serde_json::json!({ "ok": true, "channel_connected": connected }))
}

/// GET /pairing
async fn pairing(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.channel.pairing_status().await)
}

/// POST /send-message
///
/// Sends arbitrary text to a user.
async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Response {
    let (Some(user_id), Some(message)) = (required(&req.user_id), required(&req.message)) else {
        return error_response(StatusCode::BAD_REQUEST, "user_id and message are required");
    };

    if let Err(e) = state.channel.health_check().await {
        tracing::warn!(error = %e, "Send requested while channel is down");
        return error_response(StatusCode::SERVICE_UNAVAILABLE, "channel is not connected");
    }

    match state.channel.send_text(user_id, message).await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(e) => {
            tracing::error!(user_id, error = %e, "Dashboard message failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// POST /approve-and-notify
///
/// Sets a record's status, then tells the applicant.
async fn approve_and_notify(
    State(state): State<AppState>,
    Json(req): Json<ApproveRequest>,
) -> Response {
    let (Some(id), Some(user_id)) = (required(&req.id), required(&req.user_id)) else {
        return error_response(StatusCode::BAD_REQUEST, "id and user_id are required");
    };
    let Ok(id) = Uuid::parse_str(id) else {
        return error_response(StatusCode::BAD_REQUEST, "id is not a valid record id");
    };
    let status = required(&req.status).unwrap_or(DEFAULT_STATUS);

    match state.db.update_record_status(id, status).await {
        Ok(true) => {}
        Ok(false) => return error_response(StatusCode::NOT_FOUND, "record not found"),
        Err(e) => {
            tracing::error!(record_id = %id, error = %e, "Status update failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    }
    tracing::info!(record_id = %id, status, "Record status updated");

    let notice = required(&req.message)
        .map(String::from)
        .unwrap_or_else(|| status_notice(status));
    if let Err(e) = state.channel.send_text(user_id, &notice).await {
        tracing::error!(record_id = %id, user_id, error = %e, "Applicant notification failed");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    Json(serde_json::json!({ "ok": true, "id": id, "status": status })).into_response()
}

/// GET /api/records/{id}
async fn get_record(State(state): State<AppState>, UrlPath(id): UrlPath<String>) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        return error_response(StatusCode::BAD_REQUEST, "id is not a valid record id");
    };
    match state.db.get_record(id).await {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "record not found"),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// CORS policy: a single configured origin, or any origin when unset.
pub fn cors_layer(origin: Option<&str>) -> Result<CorsLayer, ConfigError> {
    let Some(origin) = origin else {
        return Ok(CorsLayer::permissive());
    };
    let origin: HeaderValue = origin.parse().map_err(|_| ConfigError::InvalidValue {
        key: "INTAKE_CORS_ORIGIN".into(),
        message: format!("{origin} is not a valid header value"),
    })?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any))
}

/// Build the control routes. Local uploads are served under `/files` when
/// `files_dir` is given.
pub fn control_routes(state: AppState, cors: CorsLayer, files_dir: Option<&Path>) -> Router {
    let mut router = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/pairing", get(pairing))
        .route("/send-message", post(send_message))
        .route("/approve-and-notify", post(approve_and_notify))
        .route("/api/records/{id}", get(get_record))
        .with_state(state);

    if let Some(dir) = files_dir {
        router = router.nest_service("/files", ServeDir::new(dir));
    }

    router.layer(cors)
}
