//! # vault-audit
//!
//! Audit logging for a secrets server: a broker that fans every request and
//! response out to operator-configured devices (files, sockets, syslog), with
//! salted HMAC redaction, a persisted header allowlist and expression filters.
//!
//! ## Features
//!
//! - **Broker**: concurrent dispatch with an at-least-one success threshold
//! - **Redaction**: HMAC-SHA256 of tokens, accessors and data values per device salt
//! - **Formats**: JSON and JSONx entries with optional prefix
//! - **Sinks**: file (with reopen), TCP/UDP/unix socket (with reconnect), syslog
//! - **Observability**: structured tracing and pluggable metrics
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vault_audit::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let settings = Settings::load()?;
//!     init_tracing(&settings);
//!
//!     let ctx = AuditContext::root();
//!     let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
//!     let broker = settings
//!         .build_broker(&ctx, storage, default_metrics())
//!         .await?;
//!
//!     let input = LogInput::with_request(Request {
//!         path: "secret/data/app".into(),
//!         ..Request::default()
//!     });
//!     broker.log_request(&ctx, &input).await?;
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod context;
pub mod error;
pub mod metrics;
pub mod namespace;
pub mod observability;
pub mod storage;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::audit::{
        AuditEvent, Backend, BackendConfig, Broker, CommunityEdition, Device, DeviceType,
        Edition, EntryFormatter, FilteringEdition, Format, FormatterConfig, HeadersConfig,
        LogInput, MountEntry, Operation, Request, Response, Subtype,
    };
    pub use crate::config::{DeviceSettings, Settings};
    pub use crate::context::AuditContext;
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::metrics::{InMemoryMetrics, MetricsSink, NoopMetrics, SharedMetrics};
    pub use crate::namespace::Namespace;
    pub use crate::observability::{default_metrics, init_tracing};
    pub use crate::storage::{FileStorage, InMemoryStorage, Storage, StorageEntry, StorageView};
}
