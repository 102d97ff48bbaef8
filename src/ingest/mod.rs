// src/ingest/mod.rs
//! Stream ingestion
//!
//! The persistent per-meeting WebSocket connection that feeds live media
//! chunks into the recording manager.

pub mod endpoint;

pub use endpoint::{router, IngestState};
