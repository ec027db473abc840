//! Sink that accepts and drops every event

use async_trait::async_trait;

use super::Sink;
use crate::audit::event::PipelineEvent;
use crate::context::AuditContext;
use crate::error::Result;

/// Accepts every event without writing it
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl NoopSink {
    /// Create a noop sink
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sink for NoopSink {
    async fn process(&self, ctx: &AuditContext, _event: &PipelineEvent) -> Result<()> {
        ctx.check()
    }

    fn sink_type(&self) -> &'static str {
        "noop"
    }
}
