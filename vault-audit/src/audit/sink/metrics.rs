//! Metric wrappers for sinks
//!
//! A device wraps its sink in a [`SinkMetricTimer`] and then a
//! [`SinkMetricCounter`], so every write is timed and counted.

use std::sync::Arc;

use async_trait::async_trait;

use super::Sink;
use crate::audit::event::PipelineEvent;
use crate::context::AuditContext;
use crate::error::Result;
use crate::metrics::{metric_names, SharedMetrics};

/// Times each write, labelled by device name and event subtype
pub struct SinkMetricTimer {
    name: String,
    sink: Arc<dyn Sink>,
    metrics: SharedMetrics,
}

impl SinkMetricTimer {
    /// Wrap `sink`, emitting `audit.<name>.log_request|log_response`
    pub fn new(name: impl Into<String>, sink: Arc<dyn Sink>, metrics: SharedMetrics) -> Self {
        Self {
            name: name.into(),
            sink,
            metrics,
        }
    }
}

#[async_trait]
impl Sink for SinkMetricTimer {
    async fn process(&self, ctx: &AuditContext, event: &PipelineEvent) -> Result<()> {
        let result = self.sink.process(ctx, event).await;
        self.metrics.measure_since(
            &["audit", self.name.as_str(), event.payload.subtype.metric_label()],
            event.created_at,
        );
        result
    }

    async fn reopen(&self) -> Result<()> {
        self.sink.reopen().await
    }

    async fn close(&self) -> Result<()> {
        self.sink.close().await
    }

    fn sink_type(&self) -> &'static str {
        self.sink.sink_type()
    }
}

/// Counts successful and failed writes
pub struct SinkMetricCounter {
    sink: Arc<dyn Sink>,
    metrics: SharedMetrics,
    fallback: bool,
}

impl SinkMetricCounter {
    /// Wrap `sink`; fallback devices count under `audit.fallback.*`
    pub fn new(sink: Arc<dyn Sink>, metrics: SharedMetrics, fallback: bool) -> Self {
        Self {
            sink,
            metrics,
            fallback,
        }
    }
}

#[async_trait]
impl Sink for SinkMetricCounter {
    async fn process(&self, ctx: &AuditContext, event: &PipelineEvent) -> Result<()> {
        let result = self.sink.process(ctx, event).await;
        let key = match (result.is_ok(), self.fallback) {
            (true, false) => metric_names::SINK_SUCCESS,
            (false, false) => metric_names::SINK_FAILURE,
            (true, true) => metric_names::FALLBACK_SUCCESS,
            (false, true) => metric_names::FALLBACK_MISS,
        };
        self.metrics.incr_counter(key, 1.0);
        result
    }

    async fn reopen(&self) -> Result<()> {
        self.sink.reopen().await
    }

    async fn close(&self) -> Result<()> {
        self.sink.close().await
    }

    fn sink_type(&self) -> &'static str {
        self.sink.sink_type()
    }
}
