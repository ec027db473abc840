//! Filter node
//!
//! Evaluates an [`Expression`] against the request of each event. Events that
//! match continue down the pipeline; the rest are dropped, which ends the
//! pipeline for that event without an error.

use super::event::PipelineEvent;
use super::expression::{Attributes, Expression};
use crate::context::AuditContext;
use crate::error::{Error, ErrorKind, Result};
use crate::namespace;

/// A pipeline node that passes or drops events
#[derive(Debug, Clone)]
pub struct EntryFilter {
    expression: Expression,
}

impl EntryFilter {
    /// Compile `filter`
    ///
    /// Unknown selectors are rejected by the parser, so an invalid filter
    /// fails here rather than on the first event.
    pub fn new(filter: &str) -> Result<Self> {
        const OP: &str = "audit.NewEntryFilter";

        let filter = filter.trim();
        if filter.is_empty() {
            return Err(Error::new(
                OP,
                "cannot create new audit filter with empty filter expression",
                ErrorKind::FilterParameter,
            ));
        }

        let expression = Expression::parse(filter).map_err(|e| {
            Error::new(OP, "cannot create new audit filter", ErrorKind::FilterParameter)
                .with_upstream(e)
        })?;

        Ok(Self { expression })
    }

    /// The expression text
    pub fn expression(&self) -> &str {
        self.expression.source()
    }

    /// Pass or drop an event
    pub async fn process(
        &self,
        ctx: &AuditContext,
        event: PipelineEvent,
    ) -> Result<Option<PipelineEvent>> {
        const OP: &str = "audit.EntryFilter.Process";
        ctx.check()?;

        let request = {
            let data = event.payload.data.as_ref().ok_or_else(|| {
                Error::invalid_parameter(OP, "cannot audit event with no data")
            })?;
            data.request
                .as_ref()
                .ok_or_else(|| Error::invalid_parameter(OP, "cannot audit event with no request"))?
        };

        let ns = namespace::from_context(ctx).map_err(|e| {
            Error::internal_error(OP, "cannot obtain namespace").with_wrapped(e)
        })?;

        let attrs = Attributes {
            operation: request.operation.as_str().to_string(),
            mount_type: request.mount_type.clone(),
            mount_point: request.mount_point.clone(),
            namespace: ns.path,
            path: request.path.clone(),
        };

        if self.expression.evaluate(&attrs) {
            Ok(Some(event))
        } else {
            tracing::trace!(filter = %self.expression.source(), path = %attrs.path, "audit event filtered out");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::event::{AuditEvent, EventOptions, Subtype};
    use crate::audit::logical::{LogInput, Request};

    fn event(mount_type: &str) -> PipelineEvent {
        let input = LogInput::with_request(Request {
            mount_type: mount_type.into(),
            path: "kv/data/foo".into(),
            ..Request::default()
        });
        let e = AuditEvent::new(Subtype::Request, EventOptions::default())
            .unwrap()
            .with_data(input);
        PipelineEvent::new(e)
    }

    #[test]
    fn test_new_rejects_empty_and_unknown_fields() {
        let err = EntryFilter::new("  ").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FilterParameter);

        let err = EntryFilter::new(r#"colour == "blue""#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FilterParameter);
        assert!(err.internal().contains("colour"));
    }

    #[tokio::test]
    async fn test_pass_and_drop() {
        let ctx = AuditContext::root();
        let kv = EntryFilter::new(r#"mount_type == "kv""#).unwrap();
        let pki = EntryFilter::new(r#"mount_type == "pki""#).unwrap();

        assert!(kv.process(&ctx, event("kv")).await.unwrap().is_some());
        assert!(pki.process(&ctx, event("kv")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_namespace_attribute() {
        let ctx = AuditContext::root().with_namespace(crate::namespace::Namespace::new("abc", "team-a/"));
        let filter = EntryFilter::new(r#"namespace == "team-a/""#).unwrap();
        assert!(filter.process(&ctx, event("kv")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_requires_namespace_and_live_context() {
        let filter = EntryFilter::new(r#"mount_type == "kv""#).unwrap();
        assert!(filter
            .process(&AuditContext::background(), event("kv"))
            .await
            .is_err());

        let ctx = AuditContext::root();
        ctx.cancel();
        let err = filter.process(&ctx, event("kv")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
