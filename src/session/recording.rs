// src/session/recording.rs
//! A single recording session
//!
//! Owns the staging file, the encoder process, and the bounded chunk path
//! for one meeting's recording. The state machine:
//!
//! ```text
//! Initializing --(encoder launched)--> Recording
//! Initializing --(launch failure)----> Failed
//! Recording    --(pause)-------------> Paused
//! Paused       --(resume)------------> Recording
//! Recording    --(stop | deadline)---> Stopped
//! Paused       --(stop)--------------> Stopped
//! (any non-terminal) --(crash/orphan)-> Failed
//! ```
//!
//! Chunks flow through a bounded queue drained by a writer task into the
//! encoder's stdin; chunks that arrive while not `Recording`, or while the
//! queue is full, are dropped rather than buffered.

use crate::encoder::{build_command, EncoderProcess};
use crate::session::chunk_queue::{ChunkQueue, ChunkQueueStats};
use crate::session::types::{
    Participant, RecordingMetadata, RecordingOptions, RecordingStatus, SessionState,
    StreamDescriptor, TranscriptionStatus,
};
use crate::storage::BlobStore;
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use ulid::Ulid;

/// Chunk path shared between the session and its writer task
struct ChunkPath {
    queue: ChunkQueue,
    notify: Notify,
    stopping: AtomicBool,
}

/// One recording's full lifecycle state
pub struct RecordingSession {
    id: String,
    options: RecordingOptions,
    started_at: DateTime<Utc>,
    staging_path: PathBuf,

    state: Mutex<SessionState>,
    ended_at: Mutex<Option<DateTime<Utc>>>,

    participants: Mutex<Vec<Participant>>,
    streams: Mutex<Vec<StreamDescriptor>>,

    chunk_path: Arc<ChunkPath>,
    writer_handle: Mutex<Option<JoinHandle<()>>>,

    encoder: OnceCell<Arc<EncoderProcess>>,

    // Serializes pause/resume/stop for this session
    control: tokio::sync::Mutex<()>,
}

impl RecordingSession {
    /// Create a session in `Initializing`; call [`initialize`](Self::initialize) next
    pub fn new(options: RecordingOptions, config: &EngineConfig) -> Arc<Self> {
        let id = Ulid::new().to_string();
        let staging_path = config
            .recording
            .staging_dir
            .join(format!("{}.{}", id, options.file_extension()));

        Arc::new(Self {
            id,
            options,
            started_at: Utc::now(),
            staging_path,
            state: Mutex::new(SessionState::Initializing),
            ended_at: Mutex::new(None),
            participants: Mutex::new(Vec::new()),
            streams: Mutex::new(Vec::new()),
            chunk_path: Arc::new(ChunkPath {
                queue: ChunkQueue::new(config.recording.chunk_queue_capacity),
                notify: Notify::new(),
                stopping: AtomicBool::new(false),
            }),
            writer_handle: Mutex::new(None),
            encoder: OnceCell::new(),
            control: tokio::sync::Mutex::new(()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn meeting_id(&self) -> &str {
        &self.options.meeting_id
    }

    pub fn options(&self) -> &RecordingOptions {
        &self.options
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn staging_path(&self) -> &PathBuf {
        &self.staging_path
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Whether a stop sequence has begun (expected encoder exit)
    pub fn is_stopping(&self) -> bool {
        self.chunk_path.stopping.load(Ordering::Acquire)
    }

    /// Chunk path statistics
    pub fn chunk_stats(&self) -> ChunkQueueStats {
        self.chunk_path.queue.stats()
    }

    /// Exit watch of the owned encoder, for the manager's crash watcher
    pub fn encoder_exit_watch(
        &self,
    ) -> Option<tokio::sync::watch::Receiver<Option<std::process::ExitStatus>>> {
        self.encoder.get().map(|e| e.exit_watch())
    }

    /// Non-blocking status snapshot
    pub fn status(&self) -> RecordingStatus {
        let state = self.state();
        RecordingStatus {
            recording: !state.is_terminal(),
            session_id: Some(self.id.clone()),
            state: Some(state),
            elapsed_secs: Some((Utc::now() - self.started_at).num_seconds().max(0) as u64),
        }
    }

    /// Create the staging location, launch the encoder, and start the writer.
    ///
    /// Transitions `Initializing → Recording` on success, `→ Failed` on
    /// launch failure.
    pub async fn initialize(&self, config: &EngineConfig) -> Result<()> {
        tokio::fs::create_dir_all(&config.recording.staging_dir)
            .await
            .map_err(|e| {
                EngineError::StorageFailed(format!(
                    "create staging dir {:?}: {}",
                    config.recording.staging_dir, e
                ))
            })?;

        let (program, args) = build_command(&config.encoder, &self.options, &self.staging_path);

        let encoder = match EncoderProcess::spawn(&program, &args) {
            Ok(encoder) => Arc::new(encoder),
            Err(e) => {
                self.mark_terminal(SessionState::Failed, Utc::now());
                return Err(e);
            }
        };
        self.encoder
            .set(Arc::clone(&encoder))
            .map_err(|_| EngineError::EncoderLaunchFailed("session already initialized".into()))?;

        let writer = {
            let chunk_path = Arc::clone(&self.chunk_path);
            let session_id = self.id.clone();
            tokio::spawn(async move { Self::writer_loop(chunk_path, encoder, session_id).await })
        };
        *self.writer_handle.lock() = Some(writer);

        *self.state.lock() = SessionState::Recording;
        info!(
            session_id = %self.id,
            meeting_id = %self.options.meeting_id,
            "Recording started (staging {:?})",
            self.staging_path
        );
        Ok(())
    }

    /// Accept one media chunk (non-blocking, fire-and-forget).
    ///
    /// Chunks are dropped — never buffered — when the session is not
    /// `Recording` or the queue is full. Returns whether the chunk was
    /// accepted.
    pub fn process_chunk(&self, chunk: Bytes) -> bool {
        if self.state() != SessionState::Recording {
            return false;
        }

        match self.chunk_path.queue.push(chunk) {
            Ok(()) => {
                self.chunk_path.notify.notify_one();
                true
            }
            Err(_) => {
                debug!(session_id = %self.id, "Chunk queue full, dropping chunk");
                false
            }
        }
    }

    /// Drain the chunk queue into the encoder until stop (or a write error)
    async fn writer_loop(
        chunk_path: Arc<ChunkPath>,
        encoder: Arc<EncoderProcess>,
        session_id: String,
    ) {
        loop {
            while let Some(chunk) = chunk_path.queue.try_pop() {
                if let Err(e) = encoder.write_chunk(&chunk).await {
                    warn!(session_id = %session_id, "Encoder write failed: {}", e);
                    return;
                }
            }

            if chunk_path.stopping.load(Ordering::Acquire) && chunk_path.queue.is_empty() {
                break;
            }

            chunk_path.notify.notified().await;
        }

        encoder.close_input().await;
    }

    /// Suspend the encoder and move `Recording → Paused`
    pub async fn pause(&self) -> Result<()> {
        let _guard = self.control.lock().await;

        let state = self.state();
        if state != SessionState::Recording {
            return Err(EngineError::InvalidTransition {
                from: state.as_str().to_string(),
                to: "paused".to_string(),
            });
        }

        let encoder = self.encoder_or_crashed()?;
        encoder.pause()?;

        // State changes only after the signal went through
        *self.state.lock() = SessionState::Paused;
        info!(session_id = %self.id, "Recording paused");
        Ok(())
    }

    /// Continue the encoder and move `Paused → Recording`
    pub async fn resume(&self) -> Result<()> {
        let _guard = self.control.lock().await;

        let state = self.state();
        if state != SessionState::Paused {
            return Err(EngineError::InvalidTransition {
                from: state.as_str().to_string(),
                to: "recording".to_string(),
            });
        }

        let encoder = self.encoder_or_crashed()?;
        encoder.resume()?;

        *self.state.lock() = SessionState::Recording;
        info!(session_id = %self.id, "Recording resumed");
        Ok(())
    }

    /// Full stop sequence: flush the encoder, upload the artifact, mint a
    /// download reference, clean up staging, and return final metadata.
    ///
    /// On upload failure the staging file is retained and the session ends
    /// `Failed`; the error propagates to the caller.
    pub async fn stop(
        &self,
        blob_store: &dyn BlobStore,
        grace: Duration,
        download_ttl: Duration,
    ) -> Result<RecordingMetadata> {
        let _guard = self.control.lock().await;

        let state = self.state();
        if !matches!(state, SessionState::Recording | SessionState::Paused) {
            return Err(EngineError::InvalidTransition {
                from: state.as_str().to_string(),
                to: "stopped".to_string(),
            });
        }

        let encoder = self.encoder_or_crashed()?;

        // A suspended encoder cannot flush; continue it first
        if state == SessionState::Paused {
            if let Err(e) = encoder.resume() {
                warn!(session_id = %self.id, "Resume before stop failed: {}", e);
            }
        }

        // Let the writer drain the queue and close the encoder's input
        self.chunk_path.stopping.store(true, Ordering::Release);
        self.chunk_path.notify.notify_one();

        let writer = self.writer_handle.lock().take();
        if let Some(mut writer) = writer {
            if tokio::time::timeout(grace, &mut writer).await.is_err() {
                warn!(session_id = %self.id, "Writer did not drain in time");
                writer.abort();
                encoder.close_input().await;
            }
        }

        // Bounded wait for the encoder to flush and exit; kill on timeout.
        // A forced kill is reported but does not fail the stop.
        match encoder.wait_exit(grace).await {
            Some(status) if !status.success() => {
                warn!(session_id = %self.id, "Encoder exited with {}", status);
            }
            Some(_) => {}
            None => {
                warn!(
                    session_id = %self.id,
                    "Encoder did not exit within {:?}, terminating", grace
                );
                encoder.terminate().await;
            }
        }

        let ended_at = Utc::now();

        let file_size_bytes = match tokio::fs::metadata(&self.staging_path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                self.mark_terminal(SessionState::Failed, ended_at);
                return Err(EngineError::StorageFailed(format!(
                    "staged file {:?} unreadable: {}",
                    self.staging_path, e
                )));
            }
        };

        let file_key = format!(
            "recordings/{}/{}.{}",
            self.options.organization_id,
            self.id,
            self.options.file_extension()
        );
        let upload_metadata = HashMap::from([
            ("meeting_id".to_string(), self.options.meeting_id.clone()),
            ("recording_id".to_string(), self.id.clone()),
        ]);

        if let Err(e) = blob_store
            .upload(
                &file_key,
                &self.staging_path,
                self.options.content_type(),
                &upload_metadata,
            )
            .await
        {
            // Keep the staging file for retry or manual recovery
            warn!(
                session_id = %self.id,
                "Upload failed, staging file retained at {:?}: {}",
                self.staging_path, e
            );
            self.mark_terminal(SessionState::Failed, ended_at);
            return Err(e);
        }

        let download_url = match blob_store
            .generate_download_url(&file_key, download_ttl)
            .await
        {
            Ok(url) => url,
            Err(e) => {
                self.mark_terminal(SessionState::Failed, ended_at);
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::remove_file(&self.staging_path).await {
            warn!(session_id = %self.id, "Failed to delete staging file: {}", e);
        }

        self.mark_terminal(SessionState::Stopped, ended_at);
        info!(
            session_id = %self.id,
            meeting_id = %self.options.meeting_id,
            "Recording stopped ({} bytes uploaded as {})",
            file_size_bytes, file_key
        );

        Ok(self.build_metadata(ended_at, file_key, download_url, file_size_bytes, None))
    }

    /// Mark the session `Failed` if it is still non-terminal.
    ///
    /// Used for encoder crashes and forced teardown; returns whether the
    /// transition happened.
    pub fn mark_failed(&self, reason: &str) -> bool {
        {
            let mut state = self.state.lock();
            if state.is_terminal() {
                return false;
            }
            *state = SessionState::Failed;
        }

        *self.ended_at.lock() = Some(Utc::now());
        if let Some(encoder) = self.encoder.get() {
            encoder.kill_now();
        }
        warn!(session_id = %self.id, "Recording failed: {}", reason);
        true
    }

    /// Last-known metadata for a failed session (no artifact, no URL)
    pub fn failure_metadata(&self, reason: &str) -> RecordingMetadata {
        let ended_at = self.ended_at.lock().unwrap_or_else(Utc::now);
        self.build_metadata(
            ended_at,
            String::new(),
            String::new(),
            0,
            Some(reason.to_string()),
        )
    }

    fn build_metadata(
        &self,
        ended_at: DateTime<Utc>,
        file_key: String,
        download_url: String,
        file_size_bytes: u64,
        failure: Option<String>,
    ) -> RecordingMetadata {
        let transcription_status = if failure.is_some() {
            TranscriptionStatus::Failed
        } else if self.options.auto_transcribe {
            TranscriptionStatus::Pending
        } else {
            TranscriptionStatus::NotRequested
        };

        RecordingMetadata {
            id: self.id.clone(),
            meeting_id: self.options.meeting_id.clone(),
            organization_id: self.options.organization_id.clone(),
            file_key,
            download_url,
            // Duration spans first start to final stop; paused time counts
            duration_secs: (ended_at - self.started_at).num_seconds().max(0) as u64,
            file_size_bytes,
            started_at: self.started_at,
            ended_at,
            participants: self.participants.lock().clone(),
            streams: self.streams.lock().clone(),
            transcription_status,
            failure,
        }
    }

    fn mark_terminal(&self, state: SessionState, ended_at: DateTime<Utc>) {
        *self.state.lock() = state;
        *self.ended_at.lock() = Some(ended_at);
    }

    fn encoder_or_crashed(&self) -> Result<&Arc<EncoderProcess>> {
        self.encoder
            .get()
            .ok_or_else(|| EngineError::EncoderCrashed("no encoder process".into()))
    }

    /// Record a participant joining (signaling-layer feed, append-only)
    pub fn add_participant(&self, participant: Participant) {
        self.participants.lock().push(participant);
    }

    /// Record a participant leaving
    pub fn mark_participant_left(&self, user_id: &str, at: DateTime<Utc>) {
        let mut participants = self.participants.lock();
        if let Some(p) = participants
            .iter_mut()
            .rev()
            .find(|p| p.user_id == user_id && p.left_at.is_none())
        {
            p.left_at = Some(at);
        }
    }

    /// Record a negotiated media track
    pub fn add_stream(&self, descriptor: StreamDescriptor) {
        self.streams.lock().push(descriptor);
    }
}

impl Drop for RecordingSession {
    fn drop(&mut self) {
        // Terminal sessions have already torn the encoder down
        if let Some(encoder) = self.encoder.get() {
            if encoder.is_running() {
                encoder.kill_now();
            }
        }
        if let Some(writer) = self.writer_handle.lock().take() {
            writer.abort();
        }
    }
}
