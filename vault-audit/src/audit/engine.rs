//! Event dispatch across device pipelines
//!
//! The engine owns every registered node and pipeline. [`Engine::send`]
//! runs an event through all pipelines concurrently and reports which sinks
//! completed. The call fails only when fewer sinks completed than the
//! success threshold; individual pipeline failures are returned as
//! warnings otherwise.

use std::collections::{BTreeMap, HashMap};

use futures::future::join_all;

use super::event::PipelineEvent;
use super::node::{Node, NodeId, NodeType};
use crate::context::AuditContext;
use crate::error::{Error, ErrorKind, MultiError, Result};

/// An ordered list of nodes an event traverses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    /// Pipeline identifier, the owning device's name
    pub id: String,
    /// Nodes in traversal order
    pub node_ids: Vec<NodeId>,
}

/// Outcome of a successful [`Engine::send`]
#[derive(Debug, Default)]
pub struct Status {
    /// Sinks that wrote the event
    pub complete_sinks: Vec<NodeId>,
    /// Errors from pipelines that did not complete
    pub warnings: Vec<Error>,
}

/// Registry of nodes and pipelines
#[derive(Debug, Default)]
pub struct Engine {
    nodes: HashMap<NodeId, Node>,
    pipelines: BTreeMap<String, Pipeline>,
    success_threshold: usize,
}

impl Engine {
    /// An empty engine with a threshold of zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pipeline together with the nodes it references
    ///
    /// Nothing is registered unless the whole pipeline is valid: the id is
    /// unused, every node is supplied and the last node is a filter or sink.
    /// A pipeline without nodes registers but fails every send.
    pub fn register_pipeline(
        &mut self,
        pipeline: Pipeline,
        nodes: &HashMap<NodeId, Node>,
    ) -> Result<()> {
        const OP: &str = "audit.Engine.register_pipeline";

        if pipeline.id.trim().is_empty() {
            return Err(Error::invalid_parameter(OP, "pipeline id is required"));
        }
        if self.pipelines.contains_key(&pipeline.id) {
            return Err(Error::new(
                OP,
                format!("pipeline {:?} already registered", pipeline.id),
                ErrorKind::BrokerRegistration,
            ));
        }
        for id in &pipeline.node_ids {
            if !nodes.contains_key(id) {
                return Err(Error::invalid_parameter(
                    OP,
                    format!("node {id} referenced by pipeline {:?} is missing", pipeline.id),
                ));
            }
        }
        if let Some(last) = pipeline.node_ids.last() {
            if !matches!(
                nodes.get(last).map(Node::node_type),
                Some(NodeType::Filter | NodeType::Sink)
            ) {
                return Err(Error::invalid_parameter(
                    OP,
                    "last node in a pipeline must be a filter or sink",
                ));
            }
        }

        for id in &pipeline.node_ids {
            if let Some(node) = nodes.get(id) {
                self.nodes.insert(id.clone(), node.clone());
            }
        }
        self.pipelines.insert(pipeline.id.clone(), pipeline);
        Ok(())
    }

    /// Remove a pipeline and close the nodes no other pipeline uses
    ///
    /// Returns whether the pipeline existed.
    pub async fn remove_pipeline_and_nodes(&mut self, id: &str) -> Result<bool> {
        const OP: &str = "audit.Engine.remove_pipeline_and_nodes";

        let Some(pipeline) = self.pipelines.remove(id) else {
            return Ok(false);
        };

        let mut errors = Vec::new();
        for node_id in pipeline.node_ids {
            let shared = self
                .pipelines
                .values()
                .any(|p| p.node_ids.contains(&node_id));
            if shared {
                continue;
            }
            if let Some(node) = self.nodes.remove(&node_id) {
                if let Err(e) = node.close().await {
                    errors.push(e);
                }
            }
        }

        if errors.is_empty() {
            Ok(true)
        } else {
            Err(Error::new(
                OP,
                format!("unable to close nodes of pipeline {id:?}"),
                ErrorKind::BrokerRegistration,
            )
            .with_upstream(MultiError(errors)))
        }
    }

    /// Minimum number of sinks that must complete for a send to succeed
    pub fn success_threshold(&self) -> usize {
        self.success_threshold
    }

    /// Set the success threshold
    pub fn set_success_threshold(&mut self, threshold: usize) {
        self.success_threshold = threshold;
    }

    /// Number of registered pipelines
    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// Number of registered nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Run the event through every pipeline
    pub async fn send(&self, ctx: &AuditContext, event: PipelineEvent) -> Result<Status> {
        const OP: &str = "audit.Engine.send";
        ctx.check()?;

        let runs = self
            .pipelines
            .values()
            .map(|pipeline| self.run_pipeline(ctx, pipeline, event.clone()));
        let results = join_all(runs).await;

        let mut status = Status::default();
        for result in results {
            match result {
                Ok(Some(sink)) => status.complete_sinks.push(sink),
                Ok(None) => {}
                Err(e) => status.warnings.push(e),
            }
        }

        if status.complete_sinks.len() >= self.success_threshold {
            return Ok(status);
        }

        let mut err = Error::internal_error(OP, "event not processed by enough 'sink' nodes");
        let mut warnings = status.warnings.into_iter();
        if let Some(first) = warnings.next() {
            err = err.with_wrapped(first);
        }
        let rest: Vec<Error> = warnings.collect();
        if !rest.is_empty() {
            err = err.with_upstream(MultiError(rest));
        }
        Err(err)
    }

    /// Returns the sink that completed, or `None` when a filter dropped the event
    async fn run_pipeline(
        &self,
        ctx: &AuditContext,
        pipeline: &Pipeline,
        event: PipelineEvent,
    ) -> Result<Option<NodeId>> {
        const OP: &str = "audit.Engine.run_pipeline";

        if pipeline.node_ids.is_empty() {
            return Err(Error::internal_error(
                OP,
                format!("device {:?} has no nodes and cannot log", pipeline.id),
            ));
        }

        let mut current = event;
        for id in &pipeline.node_ids {
            let node = self.nodes.get(id).ok_or_else(|| {
                Error::internal_error(OP, format!("node {id} is not registered"))
            })?;

            let next = node.process(ctx, current).await.map_err(|e| {
                Error::internal_error(
                    OP,
                    format!(
                        "device {:?} failed at {} node",
                        pipeline.id,
                        node.node_type()
                    ),
                )
                .with_wrapped(e)
            })?;

            let Some(event) = next else {
                return Ok(None);
            };
            if node.node_type() == NodeType::Sink {
                return Ok(Some(id.clone()));
            }
            current = event;
        }
        Ok(None)
    }
}
