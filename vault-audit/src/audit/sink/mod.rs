//! Terminal pipeline nodes that write formatted entries somewhere
//!
//! Every sink reads the bytes produced by a formatter for its configured
//! [`Format`] and writes them out. A sink never passes the event on.

pub mod file;
pub mod metrics;
pub mod noop;
pub mod socket;
pub mod stdout;
pub mod syslog;

use async_trait::async_trait;

use super::event::{Format, PipelineEvent};
use crate::context::AuditContext;
use crate::error::{Error, Result};

pub use file::{FileSink, FileSinkConfig};
pub use metrics::{SinkMetricCounter, SinkMetricTimer};
pub use noop::NoopSink;
pub use socket::{SocketSink, SocketSinkConfig, SocketType};
pub use stdout::StdoutSink;
pub use self::syslog::{SyslogSink, SyslogSinkConfig, SyslogTransport};

/// A pipeline node that writes formatted events
#[async_trait]
pub trait Sink: Send + Sync {
    /// Write the event
    async fn process(&self, ctx: &AuditContext, event: &PipelineEvent) -> Result<()>;

    /// Reopen the underlying handle or connection
    async fn reopen(&self) -> Result<()> {
        Ok(())
    }

    /// Release the underlying handle or connection
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Short name of the sink kind
    fn sink_type(&self) -> &'static str;
}

/// Fetch the bytes a sink should write
///
/// Missing bytes mean no formatter ran for this format, which is a wiring
/// error rather than an operator mistake.
pub fn formatted_bytes<'a>(op: &str, event: &'a PipelineEvent, format: Format) -> Result<&'a [u8]> {
    event.format(format.as_str()).ok_or_else(|| {
        Error::invalid_parameter(
            op,
            format!("unable to retrieve event formatted as {:?}", format.as_str()),
        )
    })
}
