//! Audit devices
//!
//! A device owns one pipeline: an optional filter, a formatter and a sink
//! wrapped in metric wrappers. The [`Backend`] trait is what the broker sees;
//! [`Device`] is the single implementation, parameterised by [`DeviceType`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use super::driver::process_manual;
use super::edition::Edition;
use super::formatter::{EntryFormatter, FormatterConfig};
use super::headers::HeaderFormatter;
use super::logical::LogInput;
use super::node::{Node, NodeId, NodeType};
use super::salt::{DeviceSalt, Salt, SaltConfig, Salter};
use super::sink::file::new_file_sink;
use super::sink::{
    FileSinkConfig, NoopSink, Sink, SinkMetricCounter, SinkMetricTimer, SocketSink,
    SocketSinkConfig, SyslogSink, SyslogSinkConfig,
};
use crate::context::AuditContext;
use crate::error::{Error, MultiError, Result};
use crate::metrics::SharedMetrics;
use crate::storage::Storage;

/// A device as seen by the broker
#[async_trait]
pub trait Backend: Salter {
    /// Mount path of the device
    fn name(&self) -> &str;

    /// Kind of sink the device writes to
    fn device_type(&self) -> DeviceType;

    /// Node IDs in traversal order
    fn node_ids(&self) -> &[NodeId];

    /// Nodes keyed by ID
    fn nodes(&self) -> &HashMap<NodeId, Node>;

    /// Whether the pipeline starts with a filter
    fn has_filtering(&self) -> bool;

    /// Whether this is a fallback device
    fn is_fallback(&self) -> bool;

    /// Send a synthetic request through this device only
    async fn log_test_message(&self, ctx: &AuditContext, input: &LogInput) -> Result<()>;

    /// Reopen sink handles
    async fn reload(&self) -> Result<()>;

    /// Drop cached state such as the salt
    async fn invalidate(&self, ctx: &AuditContext);

    /// Release sink handles
    async fn close(&self) -> Result<()>;
}

/// Kind of device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceType {
    /// Appends to a file
    File,
    /// Writes to a TCP, UDP or unix socket
    Socket,
    /// Writes to the local syslog daemon
    Syslog,
    /// Accepts and drops everything
    Noop,
}

impl DeviceType {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Socket => "socket",
            Self::Syslog => "syslog",
            Self::Noop => "noop",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "file" => Ok(Self::File),
            "socket" => Ok(Self::Socket),
            "syslog" => Ok(Self::Syslog),
            "noop" => Ok(Self::Noop),
            other => Err(Error::external_options(
                "audit.DeviceType.parse",
                format!("unknown audit device type {other:?}"),
            )),
        }
    }
}

/// Everything needed to build a device
#[derive(Clone)]
pub struct BackendConfig {
    /// Mount path, used as the device name
    pub mount_path: String,
    /// Where the salt lives in `salt_view`
    pub salt_config: SaltConfig,
    /// Storage dedicated to this device
    pub salt_view: Arc<dyn Storage>,
    /// Device options
    pub config: HashMap<String, String>,
    /// Metrics destination for the sink wrappers
    pub metrics: SharedMetrics,
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("mount_path", &self.mount_path)
            .field("salt_config", &self.salt_config)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// The audit device
pub struct Device {
    name: String,
    device_type: DeviceType,
    salt: Arc<DeviceSalt>,
    node_ids: Vec<NodeId>,
    nodes: HashMap<NodeId, Node>,
    filtering: bool,
    fallback: bool,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("device_type", &self.device_type)
            .field("node_ids", &self.node_ids)
            .field("filtering", &self.filtering)
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl Device {
    /// Build a device and its pipeline
    pub async fn new(
        device_type: DeviceType,
        config: BackendConfig,
        header_formatter: Option<Arc<dyn HeaderFormatter>>,
        edition: &dyn Edition,
    ) -> Result<Self> {
        const OP: &str = "audit.NewDevice";

        let name = config.mount_path.trim().to_string();
        if name.is_empty() {
            return Err(Error::invalid_parameter(OP, "mount path cannot be empty"));
        }
        edition.validate_options(&config.config)?;
        let fallback = edition.is_fallback(&config.config)?;

        let mut device = Self {
            name: name.clone(),
            device_type,
            salt: Arc::new(DeviceSalt::new(config.salt_view, config.salt_config)),
            node_ids: Vec::new(),
            nodes: HashMap::new(),
            filtering: false,
            fallback,
        };

        if let Some(filter) = edition.filter_node(&config.config)? {
            device.push(Node::Filter(Arc::new(filter)));
            device.filtering = true;
        }

        let formatter_config = FormatterConfig::from_options(&config.config)?;
        let format = formatter_config.format;
        let salter: Arc<dyn Salter> = device.salt.clone();
        let formatter = EntryFormatter::new(&name, formatter_config, salter, header_formatter)?;
        device.push(Node::Formatter(Arc::new(formatter)));

        let sink: Arc<dyn Sink> = match device_type {
            DeviceType::File => {
                new_file_sink(FileSinkConfig::from_options(&config.config, format)?).await?
            }
            DeviceType::Socket => Arc::new(SocketSink::new(SocketSinkConfig::from_options(
                &config.config,
                format,
            )?)),
            DeviceType::Syslog => Arc::new(SyslogSink::new(SyslogSinkConfig::from_options(
                &config.config,
                format,
            )?)?),
            DeviceType::Noop => Arc::new(NoopSink::new()),
        };

        let timer: Arc<dyn Sink> =
            Arc::new(SinkMetricTimer::new(name.clone(), sink, config.metrics.clone()));
        let counter = SinkMetricCounter::new(timer, config.metrics, fallback);
        device.push(Node::Sink(Arc::new(counter)));

        tracing::debug!(device = %name, device_type = %device_type, nodes = device.node_ids.len(), "audit device created");
        Ok(device)
    }

    fn push(&mut self, node: Node) {
        let id = NodeId::new();
        self.nodes.insert(id.clone(), node);
        self.node_ids.push(id);
    }

    /// The device's salt cache
    pub fn device_salt(&self) -> &Arc<DeviceSalt> {
        &self.salt
    }
}

#[async_trait]
impl Salter for Device {
    async fn salt(&self, ctx: &AuditContext) -> Result<Arc<Salt>> {
        self.salt.salt(ctx).await
    }
}

#[async_trait]
impl Backend for Device {
    fn name(&self) -> &str {
        &self.name
    }

    fn device_type(&self) -> DeviceType {
        self.device_type
    }

    fn node_ids(&self) -> &[NodeId] {
        &self.node_ids
    }

    fn nodes(&self) -> &HashMap<NodeId, Node> {
        &self.nodes
    }

    fn has_filtering(&self) -> bool {
        self.filtering
    }

    fn is_fallback(&self) -> bool {
        self.fallback
    }

    async fn log_test_message(&self, ctx: &AuditContext, input: &LogInput) -> Result<()> {
        process_manual(ctx, input, &self.node_ids, &self.nodes).await
    }

    async fn reload(&self) -> Result<()> {
        for node in self.nodes.values() {
            if node.node_type() == NodeType::Sink {
                node.reopen().await?;
            }
        }
        Ok(())
    }

    async fn invalidate(&self, _ctx: &AuditContext) {
        self.salt.invalidate();
    }

    async fn close(&self) -> Result<()> {
        let mut errors = Vec::new();
        for node in self.nodes.values() {
            if let Err(e) = node.close().await {
                errors.push(e);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::internal_error("audit.Device.close", "unable to close sinks")
                .with_upstream(MultiError(errors)))
        }
    }
}

/// Builds devices of a given type
#[async_trait]
pub trait DeviceFactory: Send + Sync {
    /// Build a device
    async fn create(
        &self,
        config: BackendConfig,
        header_formatter: Option<Arc<dyn HeaderFormatter>>,
    ) -> Result<Arc<dyn Backend>>;
}

/// Factory for the built-in device types
pub struct TypedDeviceFactory {
    device_type: DeviceType,
    edition: Arc<dyn Edition>,
}

impl TypedDeviceFactory {
    /// Create a factory for `device_type` under `edition`
    pub fn new(device_type: DeviceType, edition: Arc<dyn Edition>) -> Self {
        Self {
            device_type,
            edition,
        }
    }
}

#[async_trait]
impl DeviceFactory for TypedDeviceFactory {
    async fn create(
        &self,
        config: BackendConfig,
        header_formatter: Option<Arc<dyn HeaderFormatter>>,
    ) -> Result<Arc<dyn Backend>> {
        let device =
            Device::new(self.device_type, config, header_formatter, self.edition.as_ref()).await?;
        Ok(Arc::new(device))
    }
}

/// Factories for every built-in device type, keyed by type name
pub fn default_factories(edition: Arc<dyn Edition>) -> HashMap<String, Arc<dyn DeviceFactory>> {
    [
        DeviceType::File,
        DeviceType::Socket,
        DeviceType::Syslog,
        DeviceType::Noop,
    ]
    .into_iter()
    .map(|t| {
        let factory: Arc<dyn DeviceFactory> =
            Arc::new(TypedDeviceFactory::new(t, Arc::clone(&edition)));
        (t.as_str().to_string(), factory)
    })
    .collect()
}
