//! Audit broker
//!
//! The broker is the process-wide entry point for audit logging. It owns the
//! registered devices, the engine that dispatches events to their pipelines
//! and the shared header allowlist.
//!
//! Log calls take the read lock; registration, deregistration and salt
//! invalidation take the write lock. Every log call runs under a context
//! detached from the caller's cancellation and bounded by the audit timeout,
//! so a client disconnecting cannot truncate an audit write.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tokio::sync::RwLock;

use super::device::Backend;
use super::edition::{CommunityEdition, Edition};
use super::engine::{Engine, Pipeline};
use super::event::{AuditEvent, EventOptions, PipelineEvent, Subtype};
use super::headers::{HeaderFormatter, HeadersConfig};
use super::logical::LogInput;
use crate::context::AuditContext;
use crate::error::{Error, ErrorKind, MultiError, Result};
use crate::metrics::{metric_names, noop, SharedMetrics};
use crate::namespace;

/// Upper bound on a single log call
pub const DEFAULT_AUDIT_TIMEOUT: Duration = Duration::from_secs(10);

struct RegisteredDevice {
    backend: Arc<dyn Backend>,
    local: bool,
}

#[derive(Default)]
struct BrokerState {
    devices: HashMap<String, RegisteredDevice>,
    engine: Engine,
}

/// Fans audit events out to every registered device
pub struct Broker {
    state: RwLock<BrokerState>,
    headers: Arc<HeadersConfig>,
    edition: Arc<dyn Edition>,
    metrics: ArcSwap<SharedMetrics>,
    timeout: Duration,
}

impl fmt::Debug for Broker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broker")
            .field("edition", &self.edition.name())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Broker {
    /// Create a broker for `edition` sharing the `headers` allowlist
    pub fn new(headers: Arc<HeadersConfig>, edition: Arc<dyn Edition>) -> Self {
        Self {
            state: RwLock::new(BrokerState::default()),
            headers,
            edition,
            metrics: ArcSwap::from_pointee(noop()),
            timeout: DEFAULT_AUDIT_TIMEOUT,
        }
    }

    /// Create a community edition broker
    pub fn community(headers: Arc<HeadersConfig>) -> Self {
        Self::new(headers, Arc::new(CommunityEdition))
    }

    /// Bound every log call by `timeout` instead of the default
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Replace the metrics destination
    pub fn set_metrics(&self, metrics: SharedMetrics) {
        self.metrics.store(Arc::new(metrics));
    }

    /// The header allowlist
    pub fn headers(&self) -> &Arc<HeadersConfig> {
        &self.headers
    }

    /// The header allowlist as a formatter for new devices
    pub fn header_formatter(&self) -> Arc<dyn HeaderFormatter> {
        self.headers.clone()
    }

    /// The edition devices are validated against
    pub fn edition(&self) -> &Arc<dyn Edition> {
        &self.edition
    }

    /// Register a device and its pipeline
    pub async fn register(&self, backend: Arc<dyn Backend>, local: bool) -> Result<()> {
        const OP: &str = "audit.Broker.Register";

        let name = backend.name().trim().to_string();
        if name.is_empty() {
            return Err(Error::invalid_parameter(OP, "name is required"));
        }

        let mut state = self.state.write().await;
        if state.devices.contains_key(&name) {
            return Err(Error::new(
                OP,
                format!("backend already registered '{name}'"),
                ErrorKind::BrokerRegistration,
            ));
        }

        let pipeline = Pipeline {
            id: name.clone(),
            node_ids: backend.node_ids().to_vec(),
        };
        state
            .engine
            .register_pipeline(pipeline, backend.nodes())
            .map_err(|e| {
                Error::new(OP, "unable to register device pipeline", ErrorKind::BrokerRegistration)
                    .with_wrapped(e)
            })?;

        state
            .devices
            .insert(name.clone(), RegisteredDevice { backend, local });
        self.update_threshold(&mut state);

        tracing::info!(device = %name, local, "audit device registered");
        Ok(())
    }

    /// Remove a device; unknown names are not an error
    pub async fn deregister(&self, _ctx: &AuditContext, name: &str) -> Result<()> {
        const OP: &str = "audit.Broker.Deregister";

        let name = name.trim();
        if name.is_empty() {
            return Err(Error::invalid_parameter(OP, "name is required"));
        }

        let mut state = self.state.write().await;
        // remove first so a teardown failure cannot leave the device registered
        if state.devices.remove(name).is_none() {
            return Ok(());
        }
        self.update_threshold(&mut state);

        state
            .engine
            .remove_pipeline_and_nodes(name)
            .await
            .map_err(|e| {
                Error::new(OP, "unable to remove device pipeline", ErrorKind::BrokerRegistration)
                    .with_wrapped(e)
            })?;

        tracing::info!(device = %name, "audit device deregistered");
        Ok(())
    }

    fn update_threshold(&self, state: &mut BrokerState) {
        let devices = state.devices.len();
        let filtered = state
            .devices
            .values()
            .filter(|d| d.backend.has_filtering())
            .count();
        let threshold = self.edition.success_threshold(devices, filtered);
        state.engine.set_success_threshold(threshold);
    }

    /// Audit a request
    ///
    /// An error means the request could not be audited and must be refused.
    pub async fn log_request(&self, ctx: &AuditContext, input: &LogInput) -> Result<()> {
        self.log(ctx, input, Subtype::Request).await
    }

    /// Audit a response
    pub async fn log_response(&self, ctx: &AuditContext, input: &LogInput) -> Result<()> {
        self.log(ctx, input, Subtype::Response).await
    }

    async fn log(&self, ctx: &AuditContext, input: &LogInput, subtype: Subtype) -> Result<()> {
        let start = Instant::now();
        let result = self.dispatch(ctx, input, subtype).await;

        let metrics = self.metrics.load_full();
        let (timer, failure) = match subtype {
            Subtype::Request => (metric_names::LOG_REQUEST, metric_names::LOG_REQUEST_FAILURE),
            Subtype::Response => (metric_names::LOG_RESPONSE, metric_names::LOG_RESPONSE_FAILURE),
        };
        metrics.measure_since(timer, start);
        if result.is_err() {
            metrics.incr_counter(failure, 1.0);
        }
        result
    }

    async fn dispatch(&self, ctx: &AuditContext, input: &LogInput, subtype: Subtype) -> Result<()> {
        let op = match subtype {
            Subtype::Request => "audit.Broker.LogRequest",
            Subtype::Response => "audit.Broker.LogResponse",
        };

        let state = self.state.read().await;
        if state.devices.is_empty() {
            return Ok(());
        }

        if input.request.is_none() {
            return Err(Error::invalid_parameter(
                op,
                format!("request to {}-audit a nil request", subtype.entry_type()),
            ));
        }

        let ns = namespace::from_context(ctx)?;
        let event = AuditEvent::new(subtype, EventOptions::default())?.with_data(input.clone());

        // keep the caller's namespace but not its cancellation
        let audit_ctx = ctx.detached().with_namespace(ns).with_timeout(self.timeout);
        let _cancel = audit_ctx.token().clone().drop_guard();

        let status = audit_ctx
            .run(state.engine.send(&audit_ctx, PipelineEvent::new(event)))
            .await
            .map_err(|e| {
                Error::internal_error(op, "error during audit pipeline processing").with_wrapped(e)
            })?;

        for warning in &status.warnings {
            tracing::error!(error = %warning, "audit device failed to process event");
        }
        Ok(())
    }

    /// Drop every device's cached salt
    ///
    /// The key is ignored: all devices are invalidated.
    pub async fn invalidate(&self, ctx: &AuditContext, _key: &str) {
        let state = self.state.write().await;
        for device in state.devices.values() {
            device.backend.invalidate(ctx).await;
        }
    }

    /// Reopen every device's sink
    pub async fn reload(&self) -> Result<()> {
        let state = self.state.read().await;
        let mut errors = Vec::new();
        for (name, device) in &state.devices {
            if let Err(e) = device.backend.reload().await {
                tracing::error!(device = %name, error = %e, "failed to reload audit device");
                errors.push(e);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::internal_error("audit.Broker.Reload", "failed to reload audit devices")
                .with_upstream(MultiError(errors)))
        }
    }

    /// Whether `name` is registered
    pub async fn is_registered(&self, name: &str) -> bool {
        self.state.read().await.devices.contains_key(name.trim())
    }

    /// Whether the named device is local
    pub async fn is_local(&self, name: &str) -> Result<bool> {
        let state = self.state.read().await;
        state
            .devices
            .get(name.trim())
            .map(|d| d.local)
            .ok_or_else(|| unknown_backend("audit.Broker.IsLocal", name))
    }

    /// HMAC `input` with the named device's salt
    pub async fn get_hash(&self, ctx: &AuditContext, name: &str, input: &str) -> Result<String> {
        let backend = self.backend("audit.Broker.GetHash", name).await?;
        let salt = backend.salt(ctx).await?;
        Ok(salt.identified_hmac(input))
    }

    /// Send a synthetic request through the named device only
    pub async fn log_test_message(
        &self,
        ctx: &AuditContext,
        name: &str,
        input: &LogInput,
    ) -> Result<()> {
        let backend = self.backend("audit.Broker.LogTestMessage", name).await?;
        backend.log_test_message(ctx, input).await
    }

    /// Registered device names, sorted
    pub async fn device_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().await.devices.keys().cloned().collect();
        names.sort();
        names
    }

    async fn backend(&self, op: &str, name: &str) -> Result<Arc<dyn Backend>> {
        let state = self.state.read().await;
        state
            .devices
            .get(name.trim())
            .map(|d| Arc::clone(&d.backend))
            .ok_or_else(|| unknown_backend(op, name))
    }
}

fn unknown_backend(op: &str, name: &str) -> Error {
    Error::invalid_parameter(op, format!("unknown audit backend {:?}", name.trim()))
}
