// src/api/routes.rs
//! Recording control endpoints
//!
//! Thin JSON layer over the manager, consumed by the platform's API
//! gateway:
//!
//! - `POST /recordings/start`             start a recording
//! - `POST /recordings/:meeting_id/stop`  stop and return final metadata
//! - `POST /recordings/:meeting_id/pause`
//! - `POST /recordings/:meeting_id/resume`
//! - `GET  /recordings/:meeting_id`       status (never blocks)
//! - `GET  /recordings`                   all active recordings
//!
//! Errors come back as `{ "kind": ..., "message": ... }` with the stable
//! kind strings from the error taxonomy.

use crate::session::{RecordingManager, RecordingOptions};
use crate::utils::errors::EngineError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

/// Shared state for control handlers
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<RecordingManager>,
}

/// Build the control router
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/recordings", get(list_recordings))
        .route("/recordings/start", post(start_recording))
        .route("/recordings/:meeting_id", get(recording_status))
        .route("/recordings/:meeting_id/stop", post(stop_recording))
        .route("/recordings/:meeting_id/pause", post(pause_recording))
        .route("/recordings/:meeting_id/resume", post(resume_recording))
        .with_state(state)
}

/// Engine error rendered as an HTTP response
struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::NotRecording { .. } => StatusCode::NOT_FOUND,
            EngineError::AlreadyRecording { .. } | EngineError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            EngineError::UploadFailed(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "kind": self.0.kind(),
            "message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}

async fn start_recording(
    State(state): State<ApiState>,
    Json(options): Json<RecordingOptions>,
) -> Result<Json<Value>, ApiError> {
    info!(meeting_id = %options.meeting_id, "Start recording requested via API");
    let recording_id = state.manager.start(options).await?;
    Ok(Json(json!({ "recording_id": recording_id })))
}

async fn stop_recording(
    State(state): State<ApiState>,
    Path(meeting_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    info!(meeting_id = %meeting_id, "Stop recording requested via API");
    let metadata = state.manager.stop(&meeting_id).await?;
    Ok(Json(serde_json::to_value(metadata).unwrap_or(Value::Null)))
}

async fn pause_recording(
    State(state): State<ApiState>,
    Path(meeting_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.manager.pause(&meeting_id).await?;
    Ok(Json(json!({ "paused": true })))
}

async fn resume_recording(
    State(state): State<ApiState>,
    Path(meeting_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.manager.resume(&meeting_id).await?;
    Ok(Json(json!({ "resumed": true })))
}

async fn recording_status(
    State(state): State<ApiState>,
    Path(meeting_id): Path<String>,
) -> Json<Value> {
    let status = state.manager.status(&meeting_id);
    Json(serde_json::to_value(status).unwrap_or(Value::Null))
}

async fn list_recordings(State(state): State<ApiState>) -> Json<Value> {
    let active = state.manager.active_recordings();
    Json(json!({ "active": active }))
}
