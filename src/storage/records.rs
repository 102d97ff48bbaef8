// src/storage/records.rs
//! Durable recording record store
//!
//! SQLite-backed record of every recording the engine has started. Rows are
//! written at start, updated on every lifecycle transition, and finalized on
//! stop. The orphan reaper reconciles rows whose owning process died before
//! finalizing them. The free-form metadata blob carries the organization id,
//! timestamps, staging path, and failure annotations.

use crate::session::types::{RecordingMetadata, TranscriptionStatus};
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Row written when a session starts
#[derive(Debug, Clone)]
pub struct ActiveRecording {
    pub id: String,
    pub meeting_id: String,
    pub organization_id: String,
    pub staging_path: String,
    pub created_at: DateTime<Utc>,
}

/// A persisted recording record
#[derive(Debug, Clone)]
pub struct RecordingRecord {
    pub id: String,
    pub meeting_id: String,
    pub file_key: Option<String>,
    pub file_url: Option<String>,
    pub duration_secs: Option<u64>,
    pub file_size_bytes: Option<u64>,
    pub transcription_status: TranscriptionStatus,
    pub status: String,
    pub metadata: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

/// SQLite-backed record store
pub struct RecordingRecordStore {
    db: Mutex<Connection>,
}

impl RecordingRecordStore {
    /// Open (or create) the store at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::StorageFailed(format!("create {:?}: {}", parent, e)))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| EngineError::StorageFailed(format!("open database: {}", e)))?;
        // The job queue shares this database file
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| EngineError::StorageFailed(format!("busy timeout: {}", e)))?;

        let store = Self {
            db: Mutex::new(conn),
        };
        store.init_schema().await?;

        info!("Recording record store opened at {:?}", path);
        Ok(store)
    }

    /// In-memory store for tests
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::StorageFailed(format!("open database: {}", e)))?;
        let store = Self {
            db: Mutex::new(conn),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        let db = self.db.lock().await;

        db.execute(
            r#"
            CREATE TABLE IF NOT EXISTS recordings (
                id TEXT PRIMARY KEY,
                meeting_id TEXT NOT NULL,
                file_key TEXT,
                file_url TEXT,
                duration_secs INTEGER,
                file_size_bytes INTEGER,
                transcription_status TEXT NOT NULL,
                status TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            [],
        )
        .map_err(|e| EngineError::StorageFailed(format!("schema creation failed: {}", e)))?;

        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_recordings_status ON recordings(status)",
            [],
        )
        .map_err(|e| EngineError::StorageFailed(format!("index creation failed: {}", e)))?;

        Ok(())
    }

    /// Insert the row for a freshly started session (status `recording`)
    pub async fn insert_active(
        &self,
        rec: &ActiveRecording,
        transcription: TranscriptionStatus,
    ) -> Result<()> {
        let metadata = serde_json::json!({
            "organization_id": rec.organization_id,
            "started_at": rec.created_at.to_rfc3339(),
            "staging_path": rec.staging_path,
            "status": "recording",
        });

        let db = self.db.lock().await;
        db.execute(
            r#"
            INSERT INTO recordings
                (id, meeting_id, transcription_status, status, metadata, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                rec.id,
                rec.meeting_id,
                transcription.as_str(),
                "recording",
                metadata.to_string(),
                rec.created_at.timestamp(),
                rec.created_at.timestamp(),
            ],
        )
        .map_err(|e| EngineError::StorageFailed(format!("insert recording: {}", e)))?;

        debug!("Persisted active recording {} for {}", rec.id, rec.meeting_id);
        Ok(())
    }

    /// Update the lifecycle status string (`recording|paused|processing|failed`)
    pub async fn update_status(&self, id: &str, status: &str) -> Result<()> {
        let db = self.db.lock().await;
        let changed = db
            .execute(
                r#"
                UPDATE recordings
                SET status = ?,
                    metadata = json_set(metadata, '$.status', ?),
                    updated_at = ?
                WHERE id = ?
                "#,
                params![status, status, Utc::now().timestamp(), id],
            )
            .map_err(|e| EngineError::StorageFailed(format!("update status: {}", e)))?;

        if changed == 0 {
            return Err(EngineError::StorageFailed(format!(
                "no recording row for {}",
                id
            )));
        }
        Ok(())
    }

    /// Finalize a completed recording with its artifact metadata
    pub async fn finalize(&self, metadata: &RecordingMetadata) -> Result<()> {
        let status = if metadata.failure.is_some() {
            "failed"
        } else {
            "completed"
        };
        let blob = serde_json::json!({
            "organization_id": metadata.organization_id,
            "started_at": metadata.started_at.to_rfc3339(),
            "ended_at": metadata.ended_at.to_rfc3339(),
            "status": status,
            "participants": metadata.participants,
            "streams": metadata.streams,
            "failure": metadata.failure,
        });

        let db = self.db.lock().await;
        db.execute(
            r#"
            UPDATE recordings
            SET file_key = ?, file_url = ?, duration_secs = ?, file_size_bytes = ?,
                transcription_status = ?, status = ?, metadata = ?, updated_at = ?
            WHERE id = ?
            "#,
            params![
                metadata.file_key,
                metadata.download_url,
                metadata.duration_secs as i64,
                metadata.file_size_bytes as i64,
                metadata.transcription_status.as_str(),
                status,
                blob.to_string(),
                Utc::now().timestamp(),
                metadata.id,
            ],
        )
        .map_err(|e| EngineError::StorageFailed(format!("finalize recording: {}", e)))?;

        Ok(())
    }

    /// Mark a recording failed with an annotation
    pub async fn mark_failed(&self, id: &str, annotation: &str) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            r#"
            UPDATE recordings
            SET status = 'failed',
                metadata = json_set(metadata, '$.status', 'failed', '$.failure', ?),
                updated_at = ?
            WHERE id = ?
            "#,
            params![annotation, Utc::now().timestamp(), id],
        )
        .map_err(|e| EngineError::StorageFailed(format!("mark failed: {}", e)))?;
        Ok(())
    }

    /// Mark rows still `recording`/`paused` and created before `cutoff` as
    /// failed with an `orphaned` annotation. Returns the affected ids.
    pub async fn mark_orphans(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let db = self.db.lock().await;

        let mut stmt = db
            .prepare(
                "SELECT id FROM recordings
                 WHERE status IN ('recording', 'paused') AND created_at < ?",
            )
            .map_err(|e| EngineError::StorageFailed(format!("orphan query: {}", e)))?;

        let ids: Vec<String> = stmt
            .query_map(params![cutoff.timestamp()], |row| row.get(0))
            .map_err(|e| EngineError::StorageFailed(format!("orphan query: {}", e)))?
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| EngineError::StorageFailed(format!("orphan rows: {}", e)))?;
        drop(stmt);

        for id in &ids {
            db.execute(
                r#"
                UPDATE recordings
                SET status = 'failed',
                    metadata = json_set(metadata, '$.status', 'failed', '$.failure', 'orphaned'),
                    updated_at = ?
                WHERE id = ?
                "#,
                params![Utc::now().timestamp(), id],
            )
            .map_err(|e| EngineError::StorageFailed(format!("mark orphan: {}", e)))?;
        }

        Ok(ids)
    }

    /// Fetch one record by id
    pub async fn get(&self, id: &str) -> Result<Option<RecordingRecord>> {
        let db = self.db.lock().await;

        let record = db
            .query_row(
                r#"
                SELECT id, meeting_id, file_key, file_url, duration_secs, file_size_bytes,
                       transcription_status, status, metadata, created_at, updated_at
                FROM recordings WHERE id = ?
                "#,
                params![id],
                |row| {
                    let transcription: String = row.get(6)?;
                    let metadata: String = row.get(8)?;
                    Ok(RecordingRecord {
                        id: row.get(0)?,
                        meeting_id: row.get(1)?,
                        file_key: row.get(2)?,
                        file_url: row.get(3)?,
                        duration_secs: row.get::<_, Option<i64>>(4)?.map(|v| v as u64),
                        file_size_bytes: row.get::<_, Option<i64>>(5)?.map(|v| v as u64),
                        transcription_status: TranscriptionStatus::parse(&transcription)
                            .unwrap_or(TranscriptionStatus::NotRequested),
                        status: row.get(7)?,
                        metadata: serde_json::from_str(&metadata)
                            .unwrap_or(serde_json::Value::Null),
                        created_at: row.get(9)?,
                        updated_at: row.get(10)?,
                    })
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(EngineError::StorageFailed(format!("get recording: {}", other))),
            })?;

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn active(id: &str, created_at: DateTime<Utc>) -> ActiveRecording {
        ActiveRecording {
            id: id.to_string(),
            meeting_id: format!("meeting-{}", id),
            organization_id: "org1".to_string(),
            staging_path: format!("/tmp/{}.mp4", id),
            created_at,
        }
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = RecordingRecordStore::open_in_memory().await.unwrap();
        store
            .insert_active(&active("r1", Utc::now()), TranscriptionStatus::Pending)
            .await
            .unwrap();

        let record = store.get("r1").await.unwrap().unwrap();
        assert_eq!(record.status, "recording");
        assert_eq!(record.transcription_status, TranscriptionStatus::Pending);
        assert_eq!(record.metadata["organization_id"], "org1");
    }

    #[tokio::test]
    async fn test_status_transitions() {
        let store = RecordingRecordStore::open_in_memory().await.unwrap();
        store
            .insert_active(&active("r1", Utc::now()), TranscriptionStatus::NotRequested)
            .await
            .unwrap();

        store.update_status("r1", "paused").await.unwrap();
        let record = store.get("r1").await.unwrap().unwrap();
        assert_eq!(record.status, "paused");
        assert_eq!(record.metadata["status"], "paused");

        assert!(store.update_status("missing", "paused").await.is_err());
    }

    #[tokio::test]
    async fn test_orphan_sweep_respects_staleness() {
        let store = RecordingRecordStore::open_in_memory().await.unwrap();

        // 25 hours old and still "recording": orphaned
        store
            .insert_active(
                &active("stale", Utc::now() - ChronoDuration::hours(25)),
                TranscriptionStatus::Pending,
            )
            .await
            .unwrap();
        // 1 hour old: left untouched
        store
            .insert_active(
                &active("fresh", Utc::now() - ChronoDuration::hours(1)),
                TranscriptionStatus::Pending,
            )
            .await
            .unwrap();

        let cutoff = Utc::now() - ChronoDuration::hours(24);
        let orphaned = store.mark_orphans(cutoff).await.unwrap();
        assert_eq!(orphaned, vec!["stale".to_string()]);

        let stale = store.get("stale").await.unwrap().unwrap();
        assert_eq!(stale.status, "failed");
        assert_eq!(stale.metadata["failure"], "orphaned");

        let fresh = store.get("fresh").await.unwrap().unwrap();
        assert_eq!(fresh.status, "recording");
    }

    #[tokio::test]
    async fn test_completed_rows_are_not_orphaned() {
        let store = RecordingRecordStore::open_in_memory().await.unwrap();
        store
            .insert_active(
                &active("done", Utc::now() - ChronoDuration::hours(30)),
                TranscriptionStatus::Pending,
            )
            .await
            .unwrap();
        store.update_status("done", "processing").await.unwrap();

        let orphaned = store
            .mark_orphans(Utc::now() - ChronoDuration::hours(24))
            .await
            .unwrap();
        assert!(orphaned.is_empty());
    }
}
