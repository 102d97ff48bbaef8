// src/utils/config.rs
//! Engine configuration
//!
//! Layered loading: built-in defaults, then an optional `meetstream.toml`
//! (path overridable via `MEETSTREAM_CONFIG`), then `MEETSTREAM_`-prefixed
//! environment variables (e.g. `MEETSTREAM_SERVER__PORT=9090`).

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub recording: RecordingConfig,
    pub encoder: EncoderConfig,
    pub storage: StorageConfig,
    pub reaper: ReaperConfig,
}

/// HTTP/WebSocket server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// Maximum WebSocket frame size in bytes (bounds per-connection memory)
    pub max_frame_bytes: usize,

    /// Maximum assembled WebSocket message size in bytes
    pub max_message_bytes: usize,
}

/// Session and chunk-path settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Directory for in-progress staging files
    pub staging_dir: PathBuf,

    /// Bounded chunk queue capacity per session (chunks beyond this are dropped)
    pub chunk_queue_capacity: usize,

    /// Grace period for the encoder to flush and exit on stop (seconds)
    pub stop_grace_secs: u64,

    /// Validity window for generated download URLs (seconds)
    pub download_ttl_secs: u64,
}

/// External encoder process settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Encoder executable (resolved via PATH)
    pub program: String,

    /// Optional argument template replacing the built-in ffmpeg profile.
    /// Placeholders: `{output}`, `{width}`, `{height}`, `{bitrate_kbps}`, `{fps}`.
    pub arg_template: Option<Vec<String>>,
}

/// Durable storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database for recording records and the local job queue
    pub db_path: PathBuf,

    /// Root directory for the filesystem blob store
    pub blob_dir: PathBuf,

    /// Base URL prefix for generated download links
    pub download_base_url: String,
}

/// Orphan reaper settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    /// Sweep interval in seconds
    pub interval_secs: u64,

    /// Records still live after this many hours are considered orphaned
    pub staleness_hours: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8090,
                max_frame_bytes: 1024 * 1024,
                max_message_bytes: 4 * 1024 * 1024,
            },
            recording: RecordingConfig {
                staging_dir: PathBuf::from("/var/lib/meetstream/staging"),
                chunk_queue_capacity: 256,
                stop_grace_secs: 10,
                download_ttl_secs: 7 * 24 * 3600,
            },
            encoder: EncoderConfig {
                program: "ffmpeg".to_string(),
                arg_template: None,
            },
            storage: StorageConfig {
                db_path: PathBuf::from("/var/lib/meetstream/records.db"),
                blob_dir: PathBuf::from("/var/lib/meetstream/blobs"),
                download_base_url: "http://127.0.0.1:8090/downloads".to_string(),
            },
            reaper: ReaperConfig {
                interval_secs: 3600,
                staleness_hours: 24,
            },
        }
    }
}

impl EngineConfig {
    /// Load configuration from defaults, optional file, and environment
    pub fn load() -> Result<Self> {
        let config_path =
            std::env::var("MEETSTREAM_CONFIG").unwrap_or_else(|_| "meetstream.toml".to_string());

        let defaults = config::Config::try_from(&EngineConfig::default())
            .map_err(|e| EngineError::ConfigInvalid(format!("default config: {}", e)))?;

        let loaded = config::Config::builder()
            .add_source(defaults)
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(config::Environment::with_prefix("MEETSTREAM").separator("__"))
            .build()
            .map_err(|e| EngineError::ConfigInvalid(format!("config load: {}", e)))?;

        let config: EngineConfig = loaded
            .try_deserialize()
            .map_err(|e| EngineError::ConfigInvalid(format!("config parse: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.recording.chunk_queue_capacity == 0 {
            return Err(EngineError::ConfigInvalid(
                "recording.chunk_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.recording.stop_grace_secs == 0 {
            return Err(EngineError::ConfigInvalid(
                "recording.stop_grace_secs must be at least 1".to_string(),
            ));
        }
        if self.encoder.program.is_empty() {
            return Err(EngineError::ConfigInvalid(
                "encoder.program must not be empty".to_string(),
            ));
        }
        if self.reaper.staleness_hours <= 0 {
            return Err(EngineError::ConfigInvalid(
                "reaper.staleness_hours must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
