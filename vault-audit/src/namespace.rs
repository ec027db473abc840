//! Namespace identity carried by every audit call

use serde::{Deserialize, Serialize};

use crate::context::AuditContext;
use crate::error::{Error, ErrorKind, Result};

/// ID of the root namespace
pub const ROOT_NAMESPACE_ID: &str = "root";

/// A namespace as seen by the audit system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    /// Namespace identifier
    pub id: String,
    /// Namespace path (empty for root)
    pub path: String,
}

impl Namespace {
    /// Create a namespace
    pub fn new(id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }

    /// The root namespace
    pub fn root() -> Self {
        Self::new(ROOT_NAMESPACE_ID, "")
    }

    /// Whether this is the root namespace
    pub fn is_root(&self) -> bool {
        self.id == ROOT_NAMESPACE_ID
    }
}

/// Read the namespace out of a context
///
/// Every audit call requires a namespace; a context without one is an error.
pub fn from_context(ctx: &AuditContext) -> Result<Namespace> {
    ctx.namespace()
        .cloned()
        .ok_or_else(|| Error::new("", "no namespace", ErrorKind::InvalidParameter))
}
