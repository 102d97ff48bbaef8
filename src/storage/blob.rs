// src/storage/blob.rs
//! Blob store collaborator contract
//!
//! The engine treats durable artifact storage as opaque: upload a finished
//! file under a deterministic key, then mint a time-limited download
//! reference. Production deployments inject their own implementation (S3,
//! GCS); [`FsBlobStore`] covers single-node deployments and tests.

use crate::utils::errors::{EngineError, Result};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

/// Opaque artifact storage
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload the file at `source` under `key`
    async fn upload(
        &self,
        key: &str,
        source: &Path,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()>;

    /// Mint a download reference valid for `ttl`
    async fn generate_download_url(&self, key: &str, ttl: Duration) -> Result<String>;
}

/// Filesystem-backed blob store
///
/// Keys map directly to paths under the root directory; a `.meta.json`
/// sidecar carries the content type and caller metadata. Download URLs are
/// `base_url`-prefixed with an expiry timestamp and an opaque token.
pub struct FsBlobStore {
    root: PathBuf,
    base_url: String,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn upload(
        &self,
        key: &str,
        source: &Path,
        content_type: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let dest = self.path_for(key);

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| EngineError::UploadFailed(format!("create {:?}: {}", parent, e)))?;
        }

        fs::copy(source, &dest)
            .await
            .map_err(|e| EngineError::UploadFailed(format!("copy to {:?}: {}", dest, e)))?;

        let sidecar = serde_json::json!({
            "content_type": content_type,
            "metadata": metadata,
        });
        let sidecar_path = dest.with_extension(
            dest.extension()
                .map(|e| format!("{}.meta.json", e.to_string_lossy()))
                .unwrap_or_else(|| "meta.json".to_string()),
        );
        fs::write(&sidecar_path, sidecar.to_string())
            .await
            .map_err(|e| EngineError::UploadFailed(format!("write sidecar: {}", e)))?;

        info!("Uploaded {:?} as blob {}", source, key);
        Ok(())
    }

    async fn generate_download_url(&self, key: &str, ttl: Duration) -> Result<String> {
        if !self.path_for(key).exists() {
            return Err(EngineError::UploadFailed(format!("no such blob: {}", key)));
        }

        let expires = chrono::Utc::now().timestamp() + ttl.as_secs() as i64;
        let token: String = {
            let mut rng = rand::thread_rng();
            (0..32)
                .map(|_| format!("{:x}", rng.gen_range(0..16u8)))
                .collect()
        };

        let url = format!(
            "{}/{}?expires={}&token={}",
            self.base_url.trim_end_matches('/'),
            key,
            expires,
            token
        );
        debug!("Minted download url for {} (ttl {:?})", key, ttl);
        Ok(url)
    }
}
