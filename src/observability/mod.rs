// src/observability/mod.rs
//! Tracing and metrics initialization
//!
//! Structured logging goes through `tracing`; counters and gauges are
//! recorded through the `metrics` facade. Exporter wiring (Prometheus, OTLP)
//! is the host's responsibility — the engine only records.

use crate::utils::errors::{EngineError, Result};
use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Log level comes from `RUST_LOG` (default `info`); set
/// `MEETSTREAM_LOG_JSON=1` for JSON output.
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = if std::env::var("MEETSTREAM_LOG_JSON").is_ok() {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| EngineError::ConfigInvalid(format!("tracing init: {}", e)))
}

/// Register metric descriptions so recorders can expose them with help text.
pub fn init_metrics() -> Result<()> {
    metrics::describe_counter!(
        "meetstream_chunks_routed_total",
        "Media chunks accepted and forwarded to an encoder"
    );
    metrics::describe_counter!(
        "meetstream_chunks_dropped_total",
        "Media chunks dropped (no session, wrong state, or full queue)"
    );
    metrics::describe_counter!(
        "meetstream_sessions_started_total",
        "Recording sessions started"
    );
    metrics::describe_counter!(
        "meetstream_sessions_failed_total",
        "Recording sessions that ended in failure"
    );
    metrics::describe_gauge!(
        "meetstream_active_sessions",
        "Currently active recording sessions"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        // Describing metrics without a recorder installed is a no-op
        assert!(init_metrics().is_ok());
    }
}
