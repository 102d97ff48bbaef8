// src/ingest/endpoint.rs
//! WebSocket stream ingestion endpoint
//!
//! One persistent connection per meeting at `GET /ingest/:meeting_id`.
//! Binary frames are raw media chunks handed to the manager; routing is
//! fire-and-forget and never blocks the socket's read loop. Connections
//! without a meeting id are closed with policy code 1008. Frame and
//! message size caps bound the memory any one connection can pin.

use crate::session::RecordingManager;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Shared state for ingestion handlers
#[derive(Clone)]
pub struct IngestState {
    pub manager: Arc<RecordingManager>,
    pub max_frame_bytes: usize,
    pub max_message_bytes: usize,
}

/// Build the ingestion router
pub fn router(state: IngestState) -> Router {
    Router::new()
        .route("/ingest", get(reject_missing_meeting))
        .route("/ingest/:meeting_id", get(ingest_upgrade))
        .with_state(state)
}

/// A connection attempt without a meeting id: accept, then close with 1008
async fn reject_missing_meeting(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|socket| close_policy_violation(socket, "meeting id required"))
}

async fn ingest_upgrade(
    ws: WebSocketUpgrade,
    Path(meeting_id): Path<String>,
    State(state): State<IngestState>,
) -> impl IntoResponse {
    ws.max_frame_size(state.max_frame_bytes)
        .max_message_size(state.max_message_bytes)
        .on_upgrade(move |socket| handle_stream(socket, meeting_id, state.manager))
}

async fn close_policy_violation(mut socket: WebSocket, reason: &'static str) {
    warn!("Rejecting stream connection: {}", reason);
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: reason.into(),
        })))
        .await;
}

/// Read loop for one meeting's stream connection
async fn handle_stream(mut socket: WebSocket, meeting_id: String, manager: Arc<RecordingManager>) {
    if meeting_id.trim().is_empty() {
        close_policy_violation(socket, "meeting id required").await;
        return;
    }

    info!(meeting_id = %meeting_id, "Stream connection opened");

    while let Some(frame) = socket.recv().await {
        match frame {
            Ok(Message::Binary(data)) => {
                // Fire-and-forget; the manager drops chunks it cannot place
                manager.route_stream_data(&meeting_id, Bytes::from(data));
            }
            Ok(Message::Close(_)) => {
                debug!(meeting_id = %meeting_id, "Stream connection closed by client");
                break;
            }
            // Pings are answered by the socket layer; text frames carry no media
            Ok(_) => {}
            Err(e) => {
                warn!(meeting_id = %meeting_id, "Stream connection error: {}", e);
                break;
            }
        }
    }

    info!(meeting_id = %meeting_id, "Stream connection ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::LocalJobQueue;
    use crate::storage::{FsBlobStore, RecordingRecordStore};
    use crate::utils::config::EngineConfig;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tempfile::tempdir;
    use tower::ServiceExt;

    async fn test_state() -> IngestState {
        let dir = tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.recording.staging_dir = dir.path().join("staging");

        let manager = RecordingManager::new(
            config,
            Arc::new(FsBlobStore::new(
                dir.path().join("blobs"),
                "http://localhost/dl",
            )),
            Arc::new(RecordingRecordStore::open_in_memory().await.unwrap()),
            Arc::new(LocalJobQueue::open_in_memory().await.unwrap()),
        );

        IngestState {
            manager,
            max_frame_bytes: 1024,
            max_message_bytes: 4096,
        }
    }

    #[tokio::test]
    async fn test_plain_get_is_not_a_websocket() {
        let app = router(test_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/ingest/m1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        // No upgrade headers: the handshake is rejected
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = router(test_state().await);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/stream/m1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
