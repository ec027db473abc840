//! Audit pipeline
//!
//! Every audited request and response becomes an [`AuditEvent`] that the
//! [`Broker`] fans out to each registered device. A device pipeline is an
//! ordered list of nodes:
//!
//! ```text
//! [filter] -> formatter -> counter(timer(sink))
//! ```
//!
//! The formatter clones the payload into on-wire entries, applies the header
//! allowlist and HMACs sensitive values with the device's salt before
//! encoding the entry as JSON or JSONx. The broker reports success when at
//! least as many sinks as the edition's threshold accepted the event.

pub mod broker;
pub mod device;
pub mod driver;
pub mod edition;
pub mod engine;
pub mod entry;
pub mod event;
pub mod expression;
pub mod filter;
pub mod formatter;
pub mod hashstructure;
pub mod headers;
pub mod jsonx;
pub mod logical;
pub mod mount;
pub mod node;
pub mod options;
pub mod salt;
pub mod sink;

pub use broker::{Broker, DEFAULT_AUDIT_TIMEOUT};
pub use device::{default_factories, Backend, BackendConfig, Device, DeviceFactory, DeviceType};
pub use driver::process_manual;
pub use edition::{CommunityEdition, Edition, FilteringEdition};
pub use engine::{Engine, Pipeline, Status};
pub use event::{AuditEvent, EventOptions, Format, PipelineEvent, Subtype};
pub use filter::EntryFilter;
pub use formatter::{EntryFormatter, FormatterConfig};
pub use headers::{HeaderFormatter, HeaderSettings, HeadersConfig};
pub use logical::{Auth, LogInput, Operation, Request, Response};
pub use mount::{is_distinct, MountEntry};
pub use node::{Node, NodeId, NodeType};
pub use salt::{DeviceSalt, NonPersistentSalt, Salt, SaltConfig, Salter, StaticSalt};
pub use sink::Sink;
