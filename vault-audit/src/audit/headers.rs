//! Configured header allowlist
//!
//! Only headers named in the allowlist survive into the audit log. Each entry
//! may request that its values be HMAC'd. The allowlist is persisted as a
//! single JSON document and reloaded on [`HeadersConfig::invalidate`].

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::logical::Headers;
use super::salt::Salter;
use crate::context::AuditContext;
use crate::error::{Error, ErrorKind, Result};
use crate::storage::{Storage, StorageEntry, StorageView};

/// Storage view prefix holding the allowlist
pub const AUDITED_HEADERS_SUB_PATH: &str = "audited-headers-config/";

/// Storage key of the allowlist inside its view
pub const AUDITED_HEADERS_ENTRY: &str = "audited-headers";

/// Headers present in every allowlist unless explicitly overridden
pub const DEFAULT_HEADERS: &[&str] = &["correlation-id", "x-correlation-id", "user-agent"];

/// Per-header policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeaderSettings {
    /// Replace each value with its identified HMAC
    #[serde(rename = "HMAC", default)]
    pub hmac: bool,
}

/// Filters a header map through a configuration
#[async_trait]
pub trait HeaderFormatter: Send + Sync {
    /// Return the subset of `headers` allowed by the configuration
    async fn apply_config(
        &self,
        ctx: &AuditContext,
        headers: &Headers,
        salter: &dyn Salter,
    ) -> Result<Headers>;
}

/// The broker-wide header allowlist
pub struct HeadersConfig {
    headers: RwLock<BTreeMap<String, HeaderSettings>>,
    view: Arc<dyn Storage>,
}

impl std::fmt::Debug for HeadersConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadersConfig").finish_non_exhaustive()
    }
}

impl HeadersConfig {
    /// Create an empty allowlist persisting into `view`
    pub fn new(view: Arc<dyn Storage>) -> Self {
        Self {
            headers: RwLock::new(BTreeMap::new()),
            view,
        }
    }

    /// Create an allowlist under its own view of `storage` and load it
    pub async fn load(ctx: &AuditContext, storage: Arc<dyn Storage>) -> Result<Self> {
        let view: Arc<dyn Storage> = Arc::new(StorageView::new(storage, AUDITED_HEADERS_SUB_PATH));
        let config = Self::new(view);
        config.invalidate(ctx).await?;
        Ok(config)
    }

    /// Snapshot of the current configuration
    pub async fn headers(&self) -> BTreeMap<String, HeaderSettings> {
        self.headers.read().await.clone()
    }

    /// Add or replace a header and persist the allowlist
    pub async fn add(&self, ctx: &AuditContext, header: &str, hmac: bool) -> Result<()> {
        let header = header.trim();
        if header.is_empty() {
            return Err(Error::invalid_parameter(
                "audit.HeadersConfig.Add",
                "header value cannot be empty",
            ));
        }

        let mut headers = self.headers.write().await;
        let mut updated = headers.clone();
        updated.insert(header.to_lowercase(), HeaderSettings { hmac });
        self.persist(ctx, &updated, "audit.HeadersConfig.Add").await?;
        *headers = updated;
        Ok(())
    }

    /// Remove a header and persist the allowlist
    ///
    /// Removing an unknown header is not an error.
    pub async fn remove(&self, ctx: &AuditContext, header: &str) -> Result<()> {
        let header = header.trim();
        if header.is_empty() {
            return Err(Error::invalid_parameter(
                "audit.HeadersConfig.Remove",
                "header value cannot be empty",
            ));
        }

        let mut headers = self.headers.write().await;
        let mut updated = headers.clone();
        updated.remove(&header.to_lowercase());
        self.persist(ctx, &updated, "audit.HeadersConfig.Remove").await?;
        *headers = updated;
        Ok(())
    }

    /// Reload the allowlist from storage
    ///
    /// Keys are lowercased and defaults only fill gaps, so an operator entry
    /// for a default header is kept as configured.
    pub async fn invalidate(&self, ctx: &AuditContext) -> Result<()> {
        let mut headers = self.headers.write().await;

        let entry = self
            .view
            .get(ctx, AUDITED_HEADERS_ENTRY)
            .await
            .map_err(|e| {
                Error::new(
                    "audit.HeadersConfig.Invalidate",
                    "failed to read config",
                    ErrorKind::Persistence,
                )
                .with_wrapped(e)
            })?;

        let stored: BTreeMap<String, HeaderSettings> = match entry {
            Some(entry) => serde_json::from_slice(&entry.value).map_err(|e| {
                Error::new(
                    "audit.HeadersConfig.Invalidate",
                    "failed to parse config",
                    ErrorKind::Persistence,
                )
                .with_upstream(e)
            })?,
            None => BTreeMap::new(),
        };

        let mut loaded: BTreeMap<String, HeaderSettings> = stored
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .collect();

        for default in DEFAULT_HEADERS {
            loaded
                .entry((*default).to_string())
                .or_insert(HeaderSettings { hmac: false });
        }

        *headers = loaded;
        Ok(())
    }

    async fn persist(
        &self,
        ctx: &AuditContext,
        headers: &BTreeMap<String, HeaderSettings>,
        op: &str,
    ) -> Result<()> {
        let value = serde_json::to_vec(headers).map_err(|e| {
            Error::new(op, "failed to encode config", ErrorKind::Persistence).with_upstream(e)
        })?;
        self.view
            .put(ctx, StorageEntry::new(AUDITED_HEADERS_ENTRY, value))
            .await
            .map_err(|e| {
                Error::new(op, "failed to persist audited headers config", ErrorKind::Persistence)
                    .with_wrapped(e)
            })
    }
}

#[async_trait]
impl HeaderFormatter for HeadersConfig {
    async fn apply_config(
        &self,
        ctx: &AuditContext,
        headers: &Headers,
        salter: &dyn Salter,
    ) -> Result<Headers> {
        if headers.is_empty() {
            return Ok(Headers::new());
        }

        let config = self.headers.read().await;

        let mut lowered: Headers = Headers::new();
        for (key, values) in headers {
            lowered
                .entry(key.to_lowercase())
                .or_default()
                .extend(values.iter().cloned());
        }

        let mut result = Headers::new();
        for (key, settings) in config.iter() {
            let Some(values) = lowered.remove(key) else {
                continue;
            };
            let values = if settings.hmac {
                let salt = salter.salt(ctx).await?;
                values.iter().map(|v| salt.identified_hmac(v)).collect()
            } else {
                values
            };
            result.insert(key.clone(), values);
        }
        Ok(result)
    }
}
