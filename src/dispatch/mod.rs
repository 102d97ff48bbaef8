// src/dispatch/mod.rs
//! Post-processing dispatch
//!
//! When a recording completes with a valid upload, downstream work is
//! enqueued as independent jobs: transcription (opt-in), file processing,
//! and analytics. Jobs are submitted concurrently and a failure to submit
//! one never blocks or rolls back the others — each job is independently
//! retryable by the dispatch service.

pub mod queue;

pub use queue::LocalJobQueue;

use crate::session::types::RecordingMetadata;
use crate::utils::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Downstream job categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Transcription,
    FileProcessing,
    Analytics,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Transcription => "transcription",
            JobType::FileProcessing => "file_processing",
            JobType::Analytics => "analytics",
        }
    }
}

/// External work-dispatch collaborator contract (fire-and-forget)
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    /// Submit one job; returns the dispatch service's job id
    async fn add_job(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        organization_id: &str,
    ) -> Result<String>;
}

/// Fans a finished recording out into its post-processing jobs
pub struct PostProcessingDispatcher {
    dispatcher: Arc<dyn JobDispatcher>,
}

impl PostProcessingDispatcher {
    pub fn new(dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Enqueue the job batch for a completed recording.
    ///
    /// Returns the ids of the jobs that were accepted. Submission failures
    /// are logged and skipped; the recording is already durable at this
    /// point and its success does not depend on downstream job fate.
    pub async fn dispatch(&self, metadata: &RecordingMetadata, auto_transcribe: bool) -> Vec<String> {
        let mut jobs: Vec<(JobType, serde_json::Value)> = Vec::with_capacity(3);

        if auto_transcribe {
            jobs.push((
                JobType::Transcription,
                serde_json::json!({
                    "recording_id": metadata.id,
                    "meeting_id": metadata.meeting_id,
                    "file_key": metadata.file_key,
                }),
            ));
        }

        jobs.push((
            JobType::FileProcessing,
            serde_json::json!({
                "recording_id": metadata.id,
                "file_key": metadata.file_key,
                "file_size_bytes": metadata.file_size_bytes,
            }),
        ));

        jobs.push((
            JobType::Analytics,
            serde_json::json!({
                "recording_id": metadata.id,
                "meeting_id": metadata.meeting_id,
                "duration_secs": metadata.duration_secs,
                "participants": metadata.participants,
            }),
        ));

        let submissions = jobs.into_iter().map(|(job_type, payload)| {
            let dispatcher = Arc::clone(&self.dispatcher);
            let organization_id = metadata.organization_id.clone();
            async move {
                match dispatcher
                    .add_job(job_type, payload, &organization_id)
                    .await
                {
                    Ok(job_id) => {
                        info!("Queued {} job {}", job_type.as_str(), job_id);
                        Some(job_id)
                    }
                    Err(e) => {
                        warn!("Failed to queue {} job: {}", job_type.as_str(), e);
                        None
                    }
                }
            }
        });

        futures::future::join_all(submissions)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::TranscriptionStatus;
    use crate::utils::errors::EngineError;
    use chrono::Utc;
    use parking_lot::Mutex;

    fn metadata() -> RecordingMetadata {
        RecordingMetadata {
            id: "rec1".to_string(),
            meeting_id: "m1".to_string(),
            organization_id: "org1".to_string(),
            file_key: "recordings/org1/rec1.mp4".to_string(),
            download_url: "http://localhost/dl/rec1".to_string(),
            duration_secs: 90,
            file_size_bytes: 1024,
            started_at: Utc::now(),
            ended_at: Utc::now(),
            participants: vec![],
            streams: vec![],
            transcription_status: TranscriptionStatus::Pending,
            failure: None,
        }
    }

    /// Records submissions; fails job types listed in `fail`
    struct RecordingDispatcher {
        submitted: Mutex<Vec<JobType>>,
        fail: Vec<JobType>,
    }

    #[async_trait]
    impl JobDispatcher for RecordingDispatcher {
        async fn add_job(
            &self,
            job_type: JobType,
            _payload: serde_json::Value,
            _organization_id: &str,
        ) -> Result<String> {
            if self.fail.contains(&job_type) {
                return Err(EngineError::DispatchFailed("queue unavailable".into()));
            }
            self.submitted.lock().push(job_type);
            Ok(format!("job-{}", job_type.as_str()))
        }
    }

    #[tokio::test]
    async fn test_dispatches_full_batch_with_transcription() {
        let inner = Arc::new(RecordingDispatcher {
            submitted: Mutex::new(vec![]),
            fail: vec![],
        });
        let dispatcher = PostProcessingDispatcher::new(inner.clone());

        let jobs = dispatcher.dispatch(&metadata(), true).await;
        assert_eq!(jobs.len(), 3);

        let submitted = inner.submitted.lock();
        assert!(submitted.contains(&JobType::Transcription));
        assert!(submitted.contains(&JobType::FileProcessing));
        assert!(submitted.contains(&JobType::Analytics));
    }

    #[tokio::test]
    async fn test_transcription_skipped_when_not_requested() {
        let inner = Arc::new(RecordingDispatcher {
            submitted: Mutex::new(vec![]),
            fail: vec![],
        });
        let dispatcher = PostProcessingDispatcher::new(inner.clone());

        let jobs = dispatcher.dispatch(&metadata(), false).await;
        assert_eq!(jobs.len(), 2);
        assert!(!inner.submitted.lock().contains(&JobType::Transcription));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_others() {
        let inner = Arc::new(RecordingDispatcher {
            submitted: Mutex::new(vec![]),
            fail: vec![JobType::Transcription],
        });
        let dispatcher = PostProcessingDispatcher::new(inner.clone());

        let jobs = dispatcher.dispatch(&metadata(), true).await;
        assert_eq!(jobs.len(), 2);

        let submitted = inner.submitted.lock();
        assert!(submitted.contains(&JobType::FileProcessing));
        assert!(submitted.contains(&JobType::Analytics));
    }
}
