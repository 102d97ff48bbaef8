// src/api/mod.rs
//! Control API
//!
//! JSON endpoints consumed by the platform's API gateway. All recording
//! semantics live in the manager; this layer only translates HTTP.

pub mod routes;

pub use routes::{router, ApiState};
