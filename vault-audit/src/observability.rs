//! Tracing and metrics initialization

use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::metrics::SharedMetrics;

/// Initialize JSON tracing at the configured level
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing(settings: &Settings) {
    let log_level = settings.log_level.clone();

    let initialized = tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init()
        .is_ok();

    if initialized {
        tracing::info!(log_level = %log_level, "Tracing initialized");
    }
}

/// Metrics destination for the audit pipeline
///
/// OpenTelemetry when the `observability` feature is enabled.
#[cfg(feature = "observability")]
pub fn default_metrics() -> SharedMetrics {
    std::sync::Arc::new(crate::metrics::OtelMetrics::new())
}

/// Metrics destination for the audit pipeline (no-op without observability feature)
#[cfg(not(feature = "observability"))]
pub fn default_metrics() -> SharedMetrics {
    crate::metrics::noop()
}
