// src/encoder/mod.rs
//! External encoder supervision
//!
//! The engine never encodes media itself. Each session owns one external
//! encoder process (ffmpeg by default) supervised by this module:
//!
//! - **Profile**: quality tier → resolution/bitrate/frame-rate, and command
//!   line assembly
//! - **Process**: spawn, stdin feed, stderr logging, pause/resume via
//!   SIGSTOP/SIGCONT, bounded graceful exit, SIGKILL fallback

pub mod process;
pub mod profile;

pub use process::EncoderProcess;
pub use profile::{build_command, EncoderProfile};
