// src/dispatch/queue.rs
//! SQLite-backed local job queue
//!
//! Default [`JobDispatcher`](super::JobDispatcher) implementation for
//! single-node deployments: jobs land as rows that an external worker drains.
//! Production deployments replace this with their work-dispatch service
//! client.

use crate::dispatch::{JobDispatcher, JobType};
use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::debug;
use ulid::Ulid;

/// A queued job row
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub organization_id: String,
    pub created_at: i64,
}

/// Local job queue over SQLite
pub struct LocalJobQueue {
    db: Mutex<Connection>,
}

impl LocalJobQueue {
    /// Open (or create) the queue at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| EngineError::StorageFailed(format!("open job queue: {}", e)))?;
        // The record store shares this database file
        conn.busy_timeout(std::time::Duration::from_secs(5))
            .map_err(|e| EngineError::StorageFailed(format!("busy timeout: {}", e)))?;
        let queue = Self {
            db: Mutex::new(conn),
        };
        queue.init_schema().await?;
        Ok(queue)
    }

    /// In-memory queue for tests
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::StorageFailed(format!("open job queue: {}", e)))?;
        let queue = Self {
            db: Mutex::new(conn),
        };
        queue.init_schema().await?;
        Ok(queue)
    }

    async fn init_schema(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                job_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                organization_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                created_at INTEGER NOT NULL
            )
            "#,
            [],
        )
        .map_err(|e| EngineError::StorageFailed(format!("job schema: {}", e)))?;
        Ok(())
    }

    /// All jobs still waiting for a worker
    pub async fn pending(&self) -> Result<Vec<QueuedJob>> {
        let db = self.db.lock().await;
        let mut stmt = db
            .prepare(
                "SELECT id, job_type, payload, organization_id, created_at
                 FROM jobs WHERE status = 'queued' ORDER BY created_at",
            )
            .map_err(|e| EngineError::StorageFailed(format!("pending query: {}", e)))?;

        let jobs = stmt
            .query_map([], |row| {
                let payload: String = row.get(2)?;
                Ok(QueuedJob {
                    id: row.get(0)?,
                    job_type: row.get(1)?,
                    payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
                    organization_id: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })
            .map_err(|e| EngineError::StorageFailed(format!("pending query: {}", e)))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| EngineError::StorageFailed(format!("pending rows: {}", e)))?;

        Ok(jobs)
    }
}

#[async_trait]
impl JobDispatcher for LocalJobQueue {
    async fn add_job(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        organization_id: &str,
    ) -> Result<String> {
        let id = Ulid::new().to_string();

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO jobs (id, job_type, payload, organization_id, created_at)
             VALUES (?, ?, ?, ?, ?)",
            params![
                id,
                job_type.as_str(),
                payload.to_string(),
                organization_id,
                Utc::now().timestamp(),
            ],
        )
        .map_err(|e| EngineError::DispatchFailed(format!("enqueue job: {}", e)))?;

        debug!("Enqueued {} job {}", job_type.as_str(), id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_job_is_pending() {
        let queue = LocalJobQueue::open_in_memory().await.unwrap();

        let id = queue
            .add_job(
                JobType::Analytics,
                serde_json::json!({"recording_id": "r1"}),
                "org1",
            )
            .await
            .unwrap();

        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].job_type, "analytics");
        assert_eq!(pending[0].payload["recording_id"], "r1");
    }

    #[tokio::test]
    async fn test_jobs_ordered_by_creation() {
        let queue = LocalJobQueue::open_in_memory().await.unwrap();
        queue
            .add_job(JobType::FileProcessing, serde_json::json!({}), "org1")
            .await
            .unwrap();
        queue
            .add_job(JobType::Transcription, serde_json::json!({}), "org1")
            .await
            .unwrap();

        let pending = queue.pending().await.unwrap();
        assert_eq!(pending.len(), 2);
    }
}
