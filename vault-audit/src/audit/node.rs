//! Pipeline nodes
//!
//! A device pipeline is an ordered list of [`NodeId`]s resolved against a
//! node map. Nodes are a closed set of variants rather than trait objects:
//! filters, formatters and sinks. Metric wrappers are sinks themselves.

use std::fmt;
use std::sync::Arc;

use super::event::{generate_id, PipelineEvent};
use super::filter::EntryFilter;
use super::formatter::EntryFormatter;
use super::sink::Sink;
use crate::context::AuditContext;
use crate::error::Result;

/// Identifier of a node registered with the engine
///
/// Format: `node_<uuid>`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(String);

impl NodeId {
    /// The prefix used for node IDs
    pub const PREFIX: &'static str = "node";

    /// Creates a new random node ID
    #[must_use]
    pub fn new() -> Self {
        Self(generate_id(Self::PREFIX))
    }

    /// Returns the node ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Kind of a pipeline node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    /// Passes or drops events
    Filter,
    /// Produces formatted bytes
    Formatter,
    /// Writes formatted bytes
    Sink,
}

impl NodeType {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::Formatter => "formatter",
            Self::Sink => "sink",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single pipeline stage
#[derive(Clone)]
pub enum Node {
    /// Expression filter
    Filter(Arc<EntryFilter>),
    /// Entry formatter
    Formatter(Arc<EntryFormatter>),
    /// Sink, usually wrapped in metric wrappers
    Sink(Arc<dyn Sink>),
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filter(filter) => f.debug_tuple("Filter").field(filter).finish(),
            Self::Formatter(formatter) => f.debug_tuple("Formatter").field(formatter).finish(),
            Self::Sink(sink) => f.debug_tuple("Sink").field(&sink.sink_type()).finish(),
        }
    }
}

impl Node {
    /// Run the event through this node
    ///
    /// `Ok(None)` means the event was dropped and the pipeline stops.
    /// Sinks hand the event back unchanged after writing it.
    pub async fn process(
        &self,
        ctx: &AuditContext,
        event: PipelineEvent,
    ) -> Result<Option<PipelineEvent>> {
        match self {
            Self::Filter(filter) => filter.process(ctx, event).await,
            Self::Formatter(formatter) => formatter.process(ctx, event).await,
            Self::Sink(sink) => {
                sink.process(ctx, &event).await?;
                Ok(Some(event))
            }
        }
    }

    /// Reopen the sink handle; other nodes have nothing to reopen
    pub async fn reopen(&self) -> Result<()> {
        match self {
            Self::Sink(sink) => sink.reopen().await,
            _ => Ok(()),
        }
    }

    /// Release sink resources
    pub async fn close(&self) -> Result<()> {
        match self {
            Self::Sink(sink) => sink.close().await,
            _ => Ok(()),
        }
    }

    /// Kind of node
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Filter(_) => NodeType::Filter,
            Self::Formatter(_) => NodeType::Formatter,
            Self::Sink(_) => NodeType::Sink,
        }
    }
}
