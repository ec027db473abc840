//! Sink writing formatted entries to standard output

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use super::{formatted_bytes, Sink};
use crate::audit::event::{Format, PipelineEvent};
use crate::context::AuditContext;
use crate::error::{Error, Result};

/// Writes every entry to stdout
#[derive(Debug, Clone, Copy)]
pub struct StdoutSink {
    format: Format,
}

impl StdoutSink {
    /// Create a stdout sink for `format`
    pub fn new(format: Format) -> Self {
        Self { format }
    }
}

#[async_trait]
impl Sink for StdoutSink {
    async fn process(&self, ctx: &AuditContext, event: &PipelineEvent) -> Result<()> {
        const OP: &str = "audit.StdoutSink.Process";
        ctx.check()?;
        let bytes = formatted_bytes(OP, event, self.format)?;

        let mut out = tokio::io::stdout();
        out.write_all(bytes).await.map_err(|e| {
            Error::internal_error(OP, "error writing to stdout").with_upstream(e)
        })?;
        out.flush()
            .await
            .map_err(|e| Error::internal_error(OP, "error flushing stdout").with_upstream(e))
    }

    fn sink_type(&self) -> &'static str {
        "stdout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::sink::testing::formatted_event;

    #[tokio::test]
    async fn test_requires_format() {
        let sink = StdoutSink::new(Format::Jsonx);
        let err = sink
            .process(&AuditContext::root(), &formatted_event(Format::Json, b"{}\n"))
            .await
            .unwrap_err();
        assert!(err.message().contains("jsonx"));
    }

    #[tokio::test]
    async fn test_writes() {
        let sink = StdoutSink::new(Format::Json);
        sink.process(&AuditContext::root(), &formatted_event(Format::Json, b"{}\n"))
            .await
            .unwrap();
    }
}
