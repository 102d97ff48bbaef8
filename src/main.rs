// src/main.rs
//! Meetstream Recording Engine
//!
//! Long-lived service hosting all active recording sessions: WebSocket
//! stream ingestion, recording control, encoder supervision, and the
//! orphan reaper.

use anyhow::Result;
use meetstream_engine::api::{self, ApiState};
use meetstream_engine::dispatch::LocalJobQueue;
use meetstream_engine::ingest::{self, IngestState};
use meetstream_engine::observability::{init_metrics, init_tracing};
use meetstream_engine::reaper::OrphanReaper;
use meetstream_engine::session::RecordingManager;
use meetstream_engine::storage::{FsBlobStore, RecordingRecordStore};
use meetstream_engine::EngineConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize observability (tracing, metrics)
    init_tracing()?;
    init_metrics()?;

    info!(
        "Starting Meetstream Recording Engine v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let config = EngineConfig::load()?;
    info!("Configuration loaded: {:?}", config);

    // Open durable collaborators
    let records = Arc::new(RecordingRecordStore::open(&config.storage.db_path).await?);
    let blob_store = Arc::new(FsBlobStore::new(
        config.storage.blob_dir.clone(),
        config.storage.download_base_url.clone(),
    ));
    let job_queue = Arc::new(LocalJobQueue::open(&config.storage.db_path).await?);

    // The manager owns all active sessions
    let manager = RecordingManager::new(
        config.clone(),
        blob_store,
        Arc::clone(&records),
        job_queue,
    );

    // Reconcile records orphaned by earlier crashes, then keep sweeping
    let reaper = OrphanReaper::new(records, config.reaper.clone());
    tokio::spawn(reaper.run());

    // Control + ingestion surface
    let app = api::router(ApiState {
        manager: Arc::clone(&manager),
    })
    .merge(ingest::router(IngestState {
        manager,
        max_frame_bytes: config.server.max_frame_bytes,
        max_message_bytes: config.server.max_message_bytes,
    }));

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown handler
    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
        info!("Received shutdown signal, cleaning up...");
    };

    match axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
    {
        Ok(_) => {
            info!("Server stopped gracefully");
            Ok(())
        }
        Err(e) => {
            error!("Server error: {}", e);
            Err(e.into())
        }
    }
}
