// src/utils/errors.rs
//! Engine error taxonomy
//!
//! Every fallible operation in the crate returns [`Result`]. Control-plane
//! errors carry a stable kind string (see [`EngineError::kind`]) so the API
//! layer can map them to responses without matching on variants.

use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    /// A non-terminal session already exists for this meeting
    #[error("meeting {meeting_id} is already being recorded")]
    AlreadyRecording { meeting_id: String },

    /// No active session exists for this meeting
    #[error("meeting {meeting_id} has no active recording")]
    NotRecording { meeting_id: String },

    /// Requested transition is not legal from the current state
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Encoder subprocess failed to start
    #[error("encoder launch failed: {0}")]
    EncoderLaunchFailed(String),

    /// Encoder subprocess died while the session was live
    #[error("encoder crashed: {0}")]
    EncoderCrashed(String),

    /// Blob store rejected the finished file
    #[error("upload failed: {0}")]
    UploadFailed(String),

    /// Durable record store or staging I/O failure
    #[error("storage failure: {0}")]
    StorageFailed(String),

    /// Job submission failure (logged by the dispatcher, never fatal)
    #[error("job dispatch failed: {0}")]
    DispatchFailed(String),

    /// Configuration could not be loaded or validated
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Underlying I/O error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Stable kind string for API consumers
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::AlreadyRecording { .. } => "already_recording",
            EngineError::NotRecording { .. } => "not_recording",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::EncoderLaunchFailed(_) => "encoder_launch_failed",
            EngineError::EncoderCrashed(_) => "encoder_crashed",
            EngineError::UploadFailed(_) => "upload_failed",
            EngineError::StorageFailed(_) => "storage_failed",
            EngineError::DispatchFailed(_) => "dispatch_failed",
            EngineError::ConfigInvalid(_) => "config_invalid",
            EngineError::Io(_) => "io_error",
        }
    }

    /// True for caller mistakes (4xx-equivalent), false for engine faults
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            EngineError::AlreadyRecording { .. }
                | EngineError::NotRecording { .. }
                | EngineError::InvalidTransition { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        let err = EngineError::AlreadyRecording {
            meeting_id: "m1".to_string(),
        };
        assert_eq!(err.kind(), "already_recording");

        let err = EngineError::NotRecording {
            meeting_id: "m1".to_string(),
        };
        assert_eq!(err.kind(), "not_recording");
        assert!(err.is_user_error());

        let err = EngineError::UploadFailed("bucket unavailable".to_string());
        assert_eq!(err.kind(), "upload_failed");
        assert!(!err.is_user_error());
    }

    #[test]
    fn test_display_includes_meeting_id() {
        let err = EngineError::AlreadyRecording {
            meeting_id: "standup-42".to_string(),
        };
        assert!(err.to_string().contains("standup-42"));
    }
}
