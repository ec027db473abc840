//! Manual pipeline traversal
//!
//! Test messages bypass the engine: the event is walked through a single
//! device's nodes here. Formatters are swapped for copies that use a
//! throwaway salt, so a test message never reads or creates the device's
//! persistent salt.

use std::collections::HashMap;
use std::sync::Arc;

use super::event::{AuditEvent, EventOptions, PipelineEvent, Subtype};
use super::logical::LogInput;
use super::node::{Node, NodeId, NodeType};
use super::salt::NonPersistentSalt;
use crate::context::AuditContext;
use crate::error::{Error, Result};

/// Walk a request event built from `input` through `node_ids` in order
///
/// Traversal stops early when a filter drops the event. The last node that
/// ran must be a filter or a sink.
pub async fn process_manual(
    ctx: &AuditContext,
    input: &LogInput,
    node_ids: &[NodeId],
    nodes: &HashMap<NodeId, Node>,
) -> Result<()> {
    const OP: &str = "audit.process_manual";

    if input.request.is_none() {
        return Err(Error::invalid_parameter(OP, "request cannot be empty"));
    }
    if node_ids.is_empty() {
        return Err(Error::invalid_parameter(OP, "node ids are required"));
    }
    if nodes.is_empty() {
        return Err(Error::invalid_parameter(OP, "nodes are required"));
    }

    let event = AuditEvent::new(Subtype::Request, EventOptions::default())?.with_data(input.clone());
    let mut current = Some(PipelineEvent::new(event));
    let mut last_seen = None;

    for id in node_ids {
        let Some(event) = current.take() else {
            break;
        };
        let node = nodes
            .get(id)
            .ok_or_else(|| Error::invalid_parameter(OP, format!("node {id} not found")))?;

        let node = match node {
            Node::Formatter(formatter) => Node::Formatter(Arc::new(
                formatter.with_salter(Arc::new(NonPersistentSalt::new())),
            )),
            other => other.clone(),
        };

        current = node.process(ctx, event).await?;
        last_seen = Some(node.node_type());
    }

    match last_seen {
        Some(NodeType::Filter) | Some(NodeType::Sink) => Ok(()),
        _ => Err(Error::invalid_parameter(
            OP,
            "last node must be a filter or sink",
        )),
    }
}
