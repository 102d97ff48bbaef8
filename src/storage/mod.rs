// src/storage/mod.rs
//! Durable storage collaborators
//!
//! - **Blob store**: opaque artifact storage behind the [`BlobStore`] trait,
//!   with a filesystem implementation for single-node deployments
//! - **Record store**: SQLite-backed durable recording records, the source
//!   of truth the orphan reaper reconciles against

pub mod blob;
pub mod records;

pub use blob::{BlobStore, FsBlobStore};
pub use records::{ActiveRecording, RecordingRecord, RecordingRecordStore};
