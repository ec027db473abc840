//! Error types for the audit subsystem
//!
//! Every fallible operation returns [`Error`], a tagged error carrying the
//! operation that failed, a human readable message, an [`ErrorKind`] category,
//! an optional upstream cause and an optional wrapped audit error.
//!
//! Two renderings are available:
//!
//! - [`Error::internal`] for server logs: `<op>: <msg>: <kind>[: <upstream>][: <wrapped>]`
//! - [`Error::external`] for API consumers: `<msg>: <kind>[: <wrapped>]`

use std::fmt;
use thiserror::Error;

/// Result type alias using the audit error
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed upstream cause
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Category of an audit error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
    /// A programmer error: a required argument was missing or malformed
    #[error("invalid internal parameter")]
    InvalidParameter,

    /// The operator supplied invalid device options
    #[error("invalid configuration")]
    ExternalOptions,

    /// Something unexpected happened inside the audit system
    #[error("audit system internal error")]
    Internal,

    /// An option only available in the enterprise edition was supplied
    #[error("enterprise-only options supplied")]
    EnterpriseOnly,

    /// Reading from or writing to storage failed
    #[error("persistence error")]
    Persistence,

    /// Device registration or teardown failed
    #[error("audit broker registration error")]
    BrokerRegistration,

    /// A proposed device collides with an existing one
    #[error("conflict")]
    Conflict,

    /// An invalid filter expression was supplied
    #[error("invalid filter")]
    FilterParameter,

    /// An invalid fallback option was supplied
    #[error("invalid fallback")]
    FallbackParameter,

    /// A configured limit (such as maximum nesting depth) was exceeded
    #[error("configuration error")]
    Configuration,

    /// The audit context was cancelled
    #[error("context canceled")]
    Cancelled,

    /// The audit context deadline elapsed
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Tagged audit error
///
/// Errors are built with [`Error::new`] and optionally decorated with an
/// upstream cause (any `std::error::Error`) and a wrapped audit [`Error`].
#[derive(Debug)]
pub struct Error {
    op: String,
    message: String,
    kind: ErrorKind,
    upstream: Option<BoxError>,
    wrapped: Option<Box<Error>>,
}

impl Error {
    /// Create a new error for the given operation
    pub fn new(op: impl Into<String>, message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            op: op.into(),
            message: message.into(),
            kind,
            upstream: None,
            wrapped: None,
        }
    }

    /// Shorthand for an [`ErrorKind::InvalidParameter`] error
    pub fn invalid_parameter(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(op, message, ErrorKind::InvalidParameter)
    }

    /// Shorthand for an [`ErrorKind::ExternalOptions`] error
    pub fn external_options(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(op, message, ErrorKind::ExternalOptions)
    }

    /// Shorthand for an [`ErrorKind::Internal`] error
    pub fn internal_error(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(op, message, ErrorKind::Internal)
    }

    /// Attach the upstream cause
    pub fn with_upstream(mut self, upstream: impl Into<BoxError>) -> Self {
        self.upstream = Some(upstream.into());
        self
    }

    /// Wrap another audit error
    pub fn with_wrapped(mut self, wrapped: Error) -> Self {
        self.wrapped = Some(Box::new(wrapped));
        self
    }

    /// The operation that produced this error
    pub fn op(&self) -> &str {
        &self.op
    }

    /// The error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The error category
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The wrapped audit error, if any
    pub fn wrapped(&self) -> Option<&Error> {
        self.wrapped.as_deref()
    }

    /// Whether this error, or any error it wraps, has the given category
    pub fn is(&self, kind: ErrorKind) -> bool {
        if self.kind == kind {
            return true;
        }
        self.wrapped.as_ref().is_some_and(|w| w.is(kind))
    }

    /// Rendering intended for server logs
    pub fn internal(&self) -> String {
        let mut parts = Vec::with_capacity(5);
        if !self.op.is_empty() {
            parts.push(self.op.clone());
        }
        if !self.message.is_empty() {
            parts.push(self.message.clone());
        }
        parts.push(self.kind.to_string());
        if let Some(ref upstream) = self.upstream {
            parts.push(upstream.to_string());
        }
        if let Some(ref wrapped) = self.wrapped {
            parts.push(wrapped.internal());
        }
        parts.join(": ")
    }

    /// Rendering intended for API responses
    ///
    /// Operation tags and upstream detail are never included.
    pub fn external(&self) -> String {
        let mut parts = Vec::with_capacity(3);
        if !self.message.is_empty() {
            parts.push(self.message.clone());
        }
        parts.push(self.kind.to_string());
        if let Some(ref wrapped) = self.wrapped {
            parts.push(wrapped.external());
        }
        parts.join(": ")
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.internal())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        if let Some(ref wrapped) = self.wrapped {
            return Some(wrapped.as_ref());
        }
        self.upstream
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Several errors reported together, rendered as a `; ` separated list
#[derive(Debug)]
pub struct MultiError(pub Vec<Error>);

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(Error::internal).collect();
        write!(f, "{} error(s) occurred: {}", self.0.len(), rendered.join("; "))
    }
}

impl std::error::Error for MultiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_rendering() {
        let err = Error::new("audit.NewEvent", "id cannot be empty", ErrorKind::InvalidParameter);
        assert_eq!(
            err.internal(),
            "audit.NewEvent: id cannot be empty: invalid internal parameter"
        );
        assert_eq!(err.to_string(), err.internal());
    }

    #[test]
    fn test_external_rendering_hides_op_and_upstream() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = Error::new("audit.FileSink.Process", "unable to write", ErrorKind::Internal)
            .with_upstream(io);

        assert_eq!(
            err.internal(),
            "audit.FileSink.Process: unable to write: audit system internal error: disk on fire"
        );
        assert_eq!(err.external(), "unable to write: audit system internal error");
    }

    #[test]
    fn test_wrapped_rendering() {
        let inner = Error::new("inner", "filter not allowed", ErrorKind::EnterpriseOnly);
        let outer = Error::new("outer", "bad options", ErrorKind::ExternalOptions).with_wrapped(inner);

        assert_eq!(
            outer.internal(),
            "outer: bad options: invalid configuration: inner: filter not allowed: enterprise-only options supplied"
        );
        assert_eq!(
            outer.external(),
            "bad options: invalid configuration: filter not allowed: enterprise-only options supplied"
        );
        assert!(outer.is(ErrorKind::EnterpriseOnly));
        assert!(outer.is(ErrorKind::ExternalOptions));
        assert!(!outer.is(ErrorKind::Persistence));
    }

    #[test]
    fn test_empty_op_is_skipped() {
        let err = Error::new("", "no namespace", ErrorKind::InvalidParameter);
        assert_eq!(err.internal(), "no namespace: invalid internal parameter");
    }

    #[test]
    fn test_multi_error_display() {
        let multi = MultiError(vec![
            Error::internal_error("a", "first"),
            Error::internal_error("b", "second"),
        ]);
        let text = multi.to_string();
        assert!(text.starts_with("2 error(s) occurred"));
        assert!(text.contains("a: first"));
        assert!(text.contains("b: second"));
    }
}
