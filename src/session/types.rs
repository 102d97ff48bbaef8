// src/session/types.rs
//! Session data model: options, states, participants, stream descriptors,
//! and the final recording metadata returned by stop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Target video quality tier, mapped to an encoder profile at launch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoQuality {
    Low,
    Medium,
    High,
    Uhd4k,
}

impl Default for VideoQuality {
    fn default() -> Self {
        Self::Medium
    }
}

/// Immutable configuration captured when a recording starts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingOptions {
    /// Owning meeting
    pub meeting_id: String,

    /// Organization the artifact belongs to (part of the blob key)
    pub organization_id: String,

    /// Capture audio only (no video track, `.m4a` artifact)
    #[serde(default)]
    pub audio_only: bool,

    /// Target video quality tier
    #[serde(default)]
    pub video_quality: VideoQuality,

    /// Automatic stop after this many seconds
    #[serde(default)]
    pub max_duration_secs: Option<u64>,

    /// Queue a transcription job after upload
    #[serde(default)]
    pub auto_transcribe: bool,

    /// Capture the meeting chat alongside the media
    #[serde(default)]
    pub capture_chat: bool,

    /// Capture screen-share tracks
    #[serde(default)]
    pub capture_screen_share: bool,
}

impl RecordingOptions {
    /// File extension of the staged artifact
    pub fn file_extension(&self) -> &'static str {
        if self.audio_only {
            "m4a"
        } else {
            "mp4"
        }
    }

    /// MIME type of the staged artifact
    pub fn content_type(&self) -> &'static str {
        if self.audio_only {
            "audio/mp4"
        } else {
            "video/mp4"
        }
    }
}

/// Recording session lifecycle states
///
/// Monotonic except for the `Recording ⇄ Paused` cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Initializing,
    Recording,
    Paused,
    Stopped,
    Failed,
}

impl SessionState {
    /// Whether this state ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Stopped | SessionState::Failed)
    }

    /// Legality of a single transition
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Initializing, Recording) => true,
            (Recording, Paused) => true,
            (Paused, Recording) => true,
            (Recording, Stopped) | (Paused, Stopped) => true,
            // Any non-terminal state may fail (launch failure, crash, orphan)
            (s, Failed) if !s.is_terminal() => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::Recording => "recording",
            SessionState::Paused => "paused",
            SessionState::Stopped => "stopped",
            SessionState::Failed => "failed",
        }
    }
}

/// A meeting participant, fed by the signaling layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub name: String,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

/// Kind of a captured media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Audio,
    Video,
    ScreenShare,
}

/// Descriptor of one negotiated media track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub kind: StreamKind,
    pub codec: String,
    pub bitrate_kbps: u32,
    pub resolution: Option<(u32, u32)>,
    pub sample_rate_hz: Option<u32>,
}

/// Transcription fate of a finished recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionStatus {
    Pending,
    NotRequested,
    Failed,
    Completed,
}

impl TranscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptionStatus::Pending => "pending",
            TranscriptionStatus::NotRequested => "not_requested",
            TranscriptionStatus::Failed => "failed",
            TranscriptionStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TranscriptionStatus::Pending),
            "not_requested" => Some(TranscriptionStatus::NotRequested),
            "failed" => Some(TranscriptionStatus::Failed),
            "completed" => Some(TranscriptionStatus::Completed),
            _ => None,
        }
    }
}

/// Final metadata returned by a successful stop and persisted durably
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingMetadata {
    pub id: String,
    pub meeting_id: String,
    pub organization_id: String,

    /// Blob store key of the uploaded artifact
    pub file_key: String,

    /// Time-limited download reference
    pub download_url: String,

    pub duration_secs: u64,
    pub file_size_bytes: u64,

    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,

    pub participants: Vec<Participant>,
    pub streams: Vec<StreamDescriptor>,

    pub transcription_status: TranscriptionStatus,

    /// Set when the session ended abnormally (encoder crash annotation etc.)
    pub failure: Option<String>,
}

/// Point-in-time view of a meeting's recording state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingStatus {
    pub recording: bool,
    pub session_id: Option<String>,
    pub state: Option<SessionState>,
    pub elapsed_secs: Option<u64>,
}

impl RecordingStatus {
    /// Status for a meeting with no active session
    pub fn idle() -> Self {
        Self {
            recording: false,
            session_id: None,
            state: None,
            elapsed_secs: None,
        }
    }
}
