// src/session/manager.rs
//! Recording session manager
//!
//! Owns the map from meeting id to active session and orchestrates every
//! lifecycle transition. The manager is strictly a directory: per-session
//! state is only ever mutated by the session itself.
//!
//! # Invariants
//!
//! - At most one non-terminal session per meeting; a second `start` is
//!   rejected with `AlreadyRecording`, never queued.
//! - A session is claimed out of the map atomically at stop-entry, which
//!   makes concurrent stops idempotent: the loser sees `NotRecording`.
//! - Terminal sessions never linger in the map; durable metadata lives in
//!   the record store only.
//!
//! Max-duration enforcement runs through one centralized [`DeadlineQueue`]
//! driven by a single task, not a timer handle per session.

use crate::dispatch::{JobDispatcher, PostProcessingDispatcher};
use crate::session::deadline::DeadlineQueue;
use crate::session::events::{EventBus, SessionEvent};
use crate::session::recording::RecordingSession;
use crate::session::types::{
    Participant, RecordingMetadata, RecordingOptions, RecordingStatus, SessionState,
    StreamDescriptor,
};
use crate::storage::{ActiveRecording, BlobStore, RecordingRecordStore};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Summary row for `active_recordings`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSessionInfo {
    pub meeting_id: String,
    pub session_id: String,
    pub state: SessionState,
    pub elapsed_secs: u64,
}

/// Directory of active recording sessions
pub struct RecordingManager {
    config: EngineConfig,
    sessions: Arc<DashMap<String, Arc<RecordingSession>>>,
    blob_store: Arc<dyn BlobStore>,
    records: Arc<RecordingRecordStore>,
    dispatcher: PostProcessingDispatcher,
    events: EventBus,
    deadlines: Arc<DeadlineQueue>,
}

impl RecordingManager {
    /// Build the manager and start its deadline driver task
    pub fn new(
        config: EngineConfig,
        blob_store: Arc<dyn BlobStore>,
        records: Arc<RecordingRecordStore>,
        job_dispatcher: Arc<dyn JobDispatcher>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            config,
            sessions: Arc::new(DashMap::new()),
            blob_store,
            records,
            dispatcher: PostProcessingDispatcher::new(job_dispatcher),
            events: EventBus::default(),
            deadlines: Arc::new(DeadlineQueue::new()),
        });

        Self::spawn_deadline_driver(Arc::clone(&manager));
        manager
    }

    fn spawn_deadline_driver(manager: Arc<RecordingManager>) {
        tokio::spawn(async move {
            loop {
                let (meeting_id, session_id) = manager.deadlines.next_expired().await;
                debug!(
                    meeting_id = %meeting_id,
                    session_id = %session_id,
                    "Max-duration deadline fired"
                );
                manager.stop_if_session(&meeting_id, &session_id).await;
            }
        });
    }

    /// Subscribe to session lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Start a recording for `options.meeting_id`.
    ///
    /// Fails with `AlreadyRecording` if a non-terminal session exists for
    /// the meeting. On success the session id is returned and a `started`
    /// event is emitted.
    pub async fn start(&self, options: RecordingOptions) -> Result<String> {
        let meeting_id = options.meeting_id.clone();
        let session = RecordingSession::new(options, &self.config);
        let session_id = session.id().to_string();

        // Reserve the meeting slot atomically; never queue a second request
        match self.sessions.entry(meeting_id.clone()) {
            Entry::Occupied(_) => {
                return Err(EngineError::AlreadyRecording { meeting_id });
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Arc::clone(&session));
            }
        }

        if let Err(e) = session.initialize(&self.config).await {
            self.sessions.remove(&meeting_id);
            error!(meeting_id = %meeting_id, "Recording start failed: {}", e);
            return Err(e);
        }

        let record = ActiveRecording {
            id: session_id.clone(),
            meeting_id: meeting_id.clone(),
            organization_id: session.options().organization_id.clone(),
            staging_path: session.staging_path().display().to_string(),
            created_at: session.started_at(),
        };
        let transcription = if session.options().auto_transcribe {
            crate::session::types::TranscriptionStatus::Pending
        } else {
            crate::session::types::TranscriptionStatus::NotRequested
        };
        if let Err(e) = self.records.insert_active(&record, transcription).await {
            // Without a durable row the reaper could never reconcile this
            // session; abort the start
            self.sessions.remove(&meeting_id);
            session.mark_failed("record store unavailable at start");
            return Err(e);
        }

        if let Some(max_secs) = session.options().max_duration_secs {
            self.deadlines
                .arm(&meeting_id, &session_id, Duration::from_secs(max_secs));
        }

        self.spawn_crash_watcher(&meeting_id, &session);

        metrics::counter!("meetstream_sessions_started_total").increment(1);
        metrics::gauge!("meetstream_active_sessions").set(self.sessions.len() as f64);

        self.events.publish(SessionEvent::Started {
            meeting_id: meeting_id.clone(),
            session_id: session_id.clone(),
        });
        info!(meeting_id = %meeting_id, session_id = %session_id, "Recording registered");

        Ok(session_id)
    }

    /// Watch for the encoder dying while the session is still live
    fn spawn_crash_watcher(&self, meeting_id: &str, session: &Arc<RecordingSession>) {
        let Some(mut exit_rx) = session.encoder_exit_watch() else {
            return;
        };

        let sessions = Arc::clone(&self.sessions);
        let records = Arc::clone(&self.records);
        let events_tx = self.events.sender();
        let session = Arc::clone(session);
        let meeting_id = meeting_id.to_string();

        tokio::spawn(async move {
            if exit_rx.wait_for(|status| status.is_some()).await.is_err() {
                return;
            }
            let status = (*exit_rx.borrow())
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown".to_string());

            // Expected exits: a stop sequence is draining this encoder
            if session.is_stopping() || session.state().is_terminal() {
                return;
            }

            let reason = format!("encoder exited unexpectedly ({})", status);
            if !session.mark_failed(&reason) {
                return;
            }

            sessions.remove_if(&meeting_id, |_, current| current.id() == session.id());
            if let Err(e) = records.mark_failed(session.id(), &reason).await {
                warn!(session_id = %session.id(), "Failed to persist crash: {}", e);
            }

            metrics::counter!("meetstream_sessions_failed_total").increment(1);
            let _ = events_tx.send(SessionEvent::Failed {
                meeting_id: meeting_id.clone(),
                session_id: session.id().to_string(),
                reason,
            });
        });
    }

    /// Stop the active recording for a meeting and return its final metadata.
    ///
    /// Idempotent against concurrent stops: the session is claimed out of
    /// the active map first, so a second caller observes `NotRecording`.
    pub async fn stop(&self, meeting_id: &str) -> Result<RecordingMetadata> {
        let (_, session) =
            self.sessions
                .remove(meeting_id)
                .ok_or_else(|| EngineError::NotRecording {
                    meeting_id: meeting_id.to_string(),
                })?;

        self.deadlines.cancel(session.id());
        metrics::gauge!("meetstream_active_sessions").set(self.sessions.len() as f64);

        if let Err(e) = self.records.update_status(session.id(), "processing").await {
            warn!(session_id = %session.id(), "Failed to persist processing status: {}", e);
        }

        let grace = Duration::from_secs(self.config.recording.stop_grace_secs);
        let ttl = Duration::from_secs(self.config.recording.download_ttl_secs);

        match session.stop(self.blob_store.as_ref(), grace, ttl).await {
            Ok(metadata) => {
                if let Err(e) = self.records.finalize(&metadata).await {
                    // The artifact is already durable; keep the stop successful
                    error!(session_id = %session.id(), "Failed to finalize record: {}", e);
                }

                let job_ids = self
                    .dispatcher
                    .dispatch(&metadata, session.options().auto_transcribe)
                    .await;
                debug!(
                    session_id = %session.id(),
                    "Queued {} post-processing jobs", job_ids.len()
                );

                self.events.publish(SessionEvent::Stopped {
                    meeting_id: meeting_id.to_string(),
                    session_id: session.id().to_string(),
                    duration_secs: metadata.duration_secs,
                });
                Ok(metadata)
            }
            Err(e) => {
                metrics::counter!("meetstream_sessions_failed_total").increment(1);
                if let Err(persist_err) = self
                    .records
                    .mark_failed(session.id(), &e.to_string())
                    .await
                {
                    warn!(session_id = %session.id(), "Failed to persist failure: {}", persist_err);
                }
                self.events.publish(SessionEvent::Failed {
                    meeting_id: meeting_id.to_string(),
                    session_id: session.id().to_string(),
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Stop triggered by the deadline driver; a no-op if the session that
    /// armed the deadline is no longer the active one
    async fn stop_if_session(&self, meeting_id: &str, session_id: &str) {
        let matches = self
            .sessions
            .get(meeting_id)
            .map(|s| s.id() == session_id)
            .unwrap_or(false);
        if !matches {
            return;
        }

        info!(
            meeting_id = %meeting_id,
            session_id = %session_id,
            "Stopping recording: max duration reached"
        );
        if let Err(e) = self.stop(meeting_id).await {
            warn!(meeting_id = %meeting_id, "Deadline-triggered stop failed: {}", e);
        }
    }

    /// Pause the active recording
    pub async fn pause(&self, meeting_id: &str) -> Result<()> {
        let session = self.session_for(meeting_id)?;
        session.pause().await?;

        if let Err(e) = self.records.update_status(session.id(), "paused").await {
            warn!(session_id = %session.id(), "Failed to persist paused status: {}", e);
        }
        self.events.publish(SessionEvent::Paused {
            meeting_id: meeting_id.to_string(),
            session_id: session.id().to_string(),
        });
        Ok(())
    }

    /// Resume a paused recording
    pub async fn resume(&self, meeting_id: &str) -> Result<()> {
        let session = self.session_for(meeting_id)?;
        session.resume().await?;

        if let Err(e) = self.records.update_status(session.id(), "recording").await {
            warn!(session_id = %session.id(), "Failed to persist recording status: {}", e);
        }
        self.events.publish(SessionEvent::Resumed {
            meeting_id: meeting_id.to_string(),
            session_id: session.id().to_string(),
        });
        Ok(())
    }

    /// Point-in-time status for a meeting. Pure read, never blocks.
    pub fn status(&self, meeting_id: &str) -> RecordingStatus {
        self.sessions
            .get(meeting_id)
            .map(|session| session.status())
            .unwrap_or_else(RecordingStatus::idle)
    }

    /// Snapshot of every active session
    pub fn active_recordings(&self) -> Vec<ActiveSessionInfo> {
        self.sessions
            .iter()
            .map(|entry| {
                let session = entry.value();
                let status = session.status();
                ActiveSessionInfo {
                    meeting_id: entry.key().clone(),
                    session_id: session.id().to_string(),
                    state: session.state(),
                    elapsed_secs: status.elapsed_secs.unwrap_or(0),
                }
            })
            .collect()
    }

    /// Route one media chunk to the owning session (fire-and-forget).
    ///
    /// A chunk for an unknown meeting is dropped with a warning — clients
    /// legitimately race against a stop. Chunks are also dropped while the
    /// session is not `Recording`.
    pub fn route_stream_data(&self, meeting_id: &str, chunk: Bytes) {
        let Some(session) = self.sessions.get(meeting_id) else {
            warn!(meeting_id = %meeting_id, "Dropping chunk for unknown meeting");
            metrics::counter!("meetstream_chunks_dropped_total").increment(1);
            return;
        };

        if session.process_chunk(chunk) {
            metrics::counter!("meetstream_chunks_routed_total").increment(1);
        } else {
            metrics::counter!("meetstream_chunks_dropped_total").increment(1);
        }
    }

    /// Append a participant to the active session (signaling-layer feed)
    pub fn add_participant(&self, meeting_id: &str, participant: Participant) -> Result<()> {
        self.session_for(meeting_id)?.add_participant(participant);
        Ok(())
    }

    /// Mark a participant as having left the meeting
    pub fn mark_participant_left(
        &self,
        meeting_id: &str,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.session_for(meeting_id)?
            .mark_participant_left(user_id, at);
        Ok(())
    }

    /// Record a negotiated media track on the active session
    pub fn add_stream(&self, meeting_id: &str, descriptor: StreamDescriptor) -> Result<()> {
        self.session_for(meeting_id)?.add_stream(descriptor);
        Ok(())
    }

    fn session_for(&self, meeting_id: &str) -> Result<Arc<RecordingSession>> {
        self.sessions
            .get(meeting_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::NotRecording {
                meeting_id: meeting_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::LocalJobQueue;
    use crate::session::types::VideoQuality;
    use crate::storage::FsBlobStore;
    use tempfile::{tempdir, TempDir};

    struct Harness {
        manager: Arc<RecordingManager>,
        records: Arc<RecordingRecordStore>,
        jobs: Arc<LocalJobQueue>,
        _dir: TempDir,
    }

    async fn harness() -> Harness {
        let dir = tempdir().unwrap();

        let mut config = EngineConfig::default();
        config.recording.staging_dir = dir.path().join("staging");
        config.recording.stop_grace_secs = 5;
        config.encoder.program = "sh".to_string();
        config.encoder.arg_template =
            Some(vec!["-c".to_string(), "cat > '{output}'".to_string()]);

        let blob_store = Arc::new(FsBlobStore::new(
            dir.path().join("blobs"),
            "http://localhost/dl",
        ));
        let records = Arc::new(RecordingRecordStore::open_in_memory().await.unwrap());
        let jobs = Arc::new(LocalJobQueue::open_in_memory().await.unwrap());

        let manager = RecordingManager::new(
            config,
            blob_store,
            Arc::clone(&records),
            Arc::clone(&jobs) as Arc<dyn JobDispatcher>,
        );

        Harness {
            manager,
            records,
            jobs,
            _dir: dir,
        }
    }

    fn options(meeting_id: &str) -> RecordingOptions {
        RecordingOptions {
            meeting_id: meeting_id.to_string(),
            organization_id: "org1".to_string(),
            audio_only: false,
            video_quality: VideoQuality::Medium,
            max_duration_secs: None,
            auto_transcribe: true,
            capture_chat: false,
            capture_screen_share: false,
        }
    }

    #[tokio::test]
    async fn test_double_start_rejected() {
        let h = harness().await;

        h.manager.start(options("m2")).await.unwrap();
        let second = h.manager.start(options("m2")).await;

        assert!(matches!(
            second,
            Err(EngineError::AlreadyRecording { .. })
        ));
        // The first session is unaffected
        assert!(h.manager.status("m2").recording);

        h.manager.stop("m2").await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_without_session() {
        let h = harness().await;
        let result = h.manager.stop("nope").await;
        assert!(matches!(result, Err(EngineError::NotRecording { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_starts_admit_one_winner() {
        let h = harness().await;

        let mut handles = vec![];
        for _ in 0..8 {
            let manager = Arc::clone(&h.manager);
            handles.push(tokio::spawn(async move {
                manager.start(options("race")).await
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);

        h.manager.stop("race").await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_finalizes_record_and_queues_jobs() {
        let h = harness().await;

        let session_id = h.manager.start(options("m1")).await.unwrap();
        h.manager
            .route_stream_data("m1", Bytes::from_static(b"chunk"));

        let metadata = h.manager.stop("m1").await.unwrap();
        assert_eq!(metadata.id, session_id);
        assert_eq!(metadata.file_size_bytes, 5);

        let record = h.records.get(&session_id).await.unwrap().unwrap();
        assert_eq!(record.status, "completed");
        assert_eq!(record.file_key.as_deref(), Some(metadata.file_key.as_str()));

        // auto_transcribe on: transcription + file processing + analytics
        let pending = h.jobs.pending().await.unwrap();
        assert_eq!(pending.len(), 3);
    }

    #[tokio::test]
    async fn test_chunks_after_stop_are_dropped() {
        let h = harness().await;

        h.manager.start(options("m1")).await.unwrap();
        h.manager.stop("m1").await.unwrap();

        // Dropped, not errored, and the session stays gone
        h.manager
            .route_stream_data("m1", Bytes::from_static(b"late"));
        assert!(!h.manager.status("m1").recording);
        assert!(h.manager.active_recordings().is_empty());
    }

    #[tokio::test]
    async fn test_pause_resume_roundtrip() {
        let h = harness().await;

        let session_id = h.manager.start(options("m1")).await.unwrap();
        h.manager.pause("m1").await.unwrap();
        assert_eq!(h.manager.status("m1").state, Some(SessionState::Paused));

        // Pausing again is surfaced, not swallowed
        assert!(matches!(
            h.manager.pause("m1").await,
            Err(EngineError::InvalidTransition { .. })
        ));

        h.manager.resume("m1").await.unwrap();
        assert_eq!(h.manager.status("m1").state, Some(SessionState::Recording));

        let record = h.records.get(&session_id).await.unwrap().unwrap();
        assert_eq!(record.status, "recording");

        h.manager.stop("m1").await.unwrap();
    }

    #[tokio::test]
    async fn test_pause_without_session() {
        let h = harness().await;
        assert!(matches!(
            h.manager.pause("m1").await,
            Err(EngineError::NotRecording { .. })
        ));
        assert!(matches!(
            h.manager.resume("m1").await,
            Err(EngineError::NotRecording { .. })
        ));
    }

    #[tokio::test]
    async fn test_max_duration_auto_stops() {
        let h = harness().await;

        let mut opts = options("m1");
        opts.max_duration_secs = Some(1);
        h.manager.start(opts).await.unwrap();
        assert!(h.manager.status("m1").recording);

        tokio::time::sleep(Duration::from_millis(2500)).await;

        let status = h.manager.status("m1");
        assert!(!status.recording);
        assert!(h.manager.active_recordings().is_empty());
    }

    #[tokio::test]
    async fn test_early_stop_cancels_deadline() {
        let h = harness().await;

        let mut opts = options("m1");
        opts.max_duration_secs = Some(3600);
        h.manager.start(opts).await.unwrap();
        h.manager.stop("m1").await.unwrap();

        // A new session for the same meeting is not affected by the old deadline
        h.manager.start(options("m1")).await.unwrap();
        assert!(h.manager.status("m1").recording);
        h.manager.stop("m1").await.unwrap();
    }

    #[tokio::test]
    async fn test_lifecycle_events_published() {
        let h = harness().await;
        let mut rx = h.manager.subscribe();

        h.manager.start(options("m1")).await.unwrap();
        h.manager.stop("m1").await.unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionEvent::Started { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            SessionEvent::Stopped { .. }
        ));
    }

    #[tokio::test]
    async fn test_participant_feed_requires_active_session() {
        let h = harness().await;

        let participant = Participant {
            user_id: "u1".to_string(),
            name: "Ada".to_string(),
            joined_at: Utc::now(),
            left_at: None,
        };
        assert!(matches!(
            h.manager.add_participant("m1", participant.clone()),
            Err(EngineError::NotRecording { .. })
        ));

        h.manager.start(options("m1")).await.unwrap();
        h.manager.add_participant("m1", participant).unwrap();

        let metadata = h.manager.stop("m1").await.unwrap();
        assert_eq!(metadata.participants.len(), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_leaves_no_session_behind() {
        let dir = tempdir().unwrap();

        let mut config = EngineConfig::default();
        config.recording.staging_dir = dir.path().join("staging");
        config.encoder.program = "definitely-not-an-encoder".to_string();

        let blob_store = Arc::new(FsBlobStore::new(
            dir.path().join("blobs"),
            "http://localhost/dl",
        ));
        let records = Arc::new(RecordingRecordStore::open_in_memory().await.unwrap());
        let jobs = Arc::new(LocalJobQueue::open_in_memory().await.unwrap());
        let manager = RecordingManager::new(config, blob_store, records, jobs);

        let result = manager.start(options("m1")).await;
        assert!(matches!(result, Err(EngineError::EncoderLaunchFailed(_))));

        // The slot is free again
        assert!(!manager.status("m1").recording);
        assert!(manager.active_recordings().is_empty());
    }
}
