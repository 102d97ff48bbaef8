// src/reaper/mod.rs
//! Orphan reaper
//!
//! Reconciliation pass against the durable record store, not against
//! in-memory sessions: a process crash loses the active-session map, but
//! its rows stay `recording`/`paused` forever unless something corrects
//! them. Each sweep marks rows older than the staleness threshold as
//! `failed` with an `orphaned` annotation.

use crate::storage::RecordingRecordStore;
use crate::utils::config::ReaperConfig;
use crate::utils::errors::Result;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Periodic sweep over persisted recording records
pub struct OrphanReaper {
    records: Arc<RecordingRecordStore>,
    config: ReaperConfig,
}

impl OrphanReaper {
    pub fn new(records: Arc<RecordingRecordStore>, config: ReaperConfig) -> Self {
        Self { records, config }
    }

    /// Run one sweep; returns the ids of the records marked orphaned
    pub async fn sweep(&self) -> Result<Vec<String>> {
        let cutoff = Utc::now() - ChronoDuration::hours(self.config.staleness_hours);
        let orphaned = self.records.mark_orphans(cutoff).await?;

        if !orphaned.is_empty() {
            info!(
                "Orphan sweep failed {} stale recording(s): {:?}",
                orphaned.len(),
                orphaned
            );
        }
        Ok(orphaned)
    }

    /// Run sweeps forever at the configured interval
    pub async fn run(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        // The immediate first tick doubles as a startup reconciliation
        loop {
            interval.tick().await;
            if let Err(e) = self.sweep().await {
                warn!("Orphan sweep failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::TranscriptionStatus;
    use crate::storage::ActiveRecording;

    fn reaper_config() -> ReaperConfig {
        ReaperConfig {
            interval_secs: 3600,
            staleness_hours: 24,
        }
    }

    fn active(id: &str, hours_ago: i64) -> ActiveRecording {
        ActiveRecording {
            id: id.to_string(),
            meeting_id: format!("meeting-{}", id),
            organization_id: "org1".to_string(),
            staging_path: format!("/tmp/{}.mp4", id),
            created_at: Utc::now() - ChronoDuration::hours(hours_ago),
        }
    }

    #[tokio::test]
    async fn test_sweep_marks_only_stale_live_records() {
        let records = Arc::new(RecordingRecordStore::open_in_memory().await.unwrap());
        records
            .insert_active(&active("stale", 25), TranscriptionStatus::Pending)
            .await
            .unwrap();
        records
            .insert_active(&active("fresh", 1), TranscriptionStatus::Pending)
            .await
            .unwrap();

        let reaper = OrphanReaper::new(Arc::clone(&records), reaper_config());
        let orphaned = reaper.sweep().await.unwrap();
        assert_eq!(orphaned, vec!["stale".to_string()]);

        let stale = records.get("stale").await.unwrap().unwrap();
        assert_eq!(stale.status, "failed");
        assert_eq!(stale.metadata["failure"], "orphaned");

        let fresh = records.get("fresh").await.unwrap().unwrap();
        assert_eq!(fresh.status, "recording");
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let records = Arc::new(RecordingRecordStore::open_in_memory().await.unwrap());
        records
            .insert_active(&active("stale", 25), TranscriptionStatus::Pending)
            .await
            .unwrap();

        let reaper = OrphanReaper::new(Arc::clone(&records), reaper_config());
        assert_eq!(reaper.sweep().await.unwrap().len(), 1);
        assert!(reaper.sweep().await.unwrap().is_empty());
    }
}
