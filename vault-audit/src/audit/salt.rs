//! Per-device HMAC salt
//!
//! Each device owns a random salt persisted in its storage view. The salt is
//! loaded lazily on first use and cached; [`DeviceSalt::invalidate`] drops the
//! cache so the next access reloads from storage.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::context::AuditContext;
use crate::error::{Error, ErrorKind, Result};
use crate::storage::{Storage, StorageEntry};

type HmacSha256 = Hmac<Sha256>;

/// Storage key of the salt inside a device view
pub const DEFAULT_SALT_LOCATION: &str = "salt";

/// Identifier prefixed to every identified HMAC
pub const HMAC_TYPE_SHA256: &str = "hmac-sha256";

/// Where the salt lives and how it is used
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaltConfig {
    /// Storage key of the salt
    pub location: String,
    /// HMAC identifier used in identified hashes
    pub hmac_type: String,
}

impl Default for SaltConfig {
    fn default() -> Self {
        Self {
            location: DEFAULT_SALT_LOCATION.to_string(),
            hmac_type: HMAC_TYPE_SHA256.to_string(),
        }
    }
}

/// A loaded salt
#[derive(Clone)]
pub struct Salt {
    value: String,
    config: SaltConfig,
    generated: bool,
}

impl std::fmt::Debug for Salt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Salt")
            .field("config", &self.config)
            .field("generated", &self.generated)
            .finish_non_exhaustive()
    }
}

impl Salt {
    /// Wrap a known salt value
    pub fn from_value(value: impl Into<String>, config: SaltConfig) -> Self {
        Self {
            value: value.into(),
            config,
            generated: false,
        }
    }

    /// Generate a fresh random salt that is never persisted
    pub fn generate(config: SaltConfig) -> Self {
        Self {
            value: Uuid::new_v4().to_string(),
            config,
            generated: true,
        }
    }

    /// Load the salt from storage, creating and persisting it when absent
    pub async fn load_or_create(
        ctx: &AuditContext,
        view: &dyn Storage,
        config: SaltConfig,
    ) -> Result<Self> {
        let existing = view.get(ctx, &config.location).await.map_err(|e| {
            Error::new("audit.Salt.load", "failed to read salt", ErrorKind::Persistence)
                .with_wrapped(e)
        })?;

        if let Some(entry) = existing {
            let value = String::from_utf8(entry.value).map_err(|e| {
                Error::new("audit.Salt.load", "salt is not valid UTF-8", ErrorKind::Persistence)
                    .with_upstream(e)
            })?;
            return Ok(Self::from_value(value, config));
        }

        let salt = Self::generate(config);
        view.put(
            ctx,
            StorageEntry::new(salt.config.location.clone(), salt.value.clone()),
        )
        .await
        .map_err(|e| {
            Error::new("audit.Salt.load", "failed to persist salt", ErrorKind::Persistence)
                .with_wrapped(e)
        })?;
        tracing::debug!(location = %salt.config.location, "generated new audit salt");
        Ok(salt)
    }

    /// Hex encoded HMAC-SHA256 of `data` keyed by the salt
    pub fn hmac(&self, data: &str) -> String {
        // HMAC accepts keys of any length, so construction cannot fail
        let mut mac = match HmacSha256::new_from_slice(self.value.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => return String::new(),
        };
        mac.update(data.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// HMAC prefixed with the configured HMAC type, e.g. `hmac-sha256:ab12...`
    pub fn identified_hmac(&self, data: &str) -> String {
        format!("{}:{}", self.config.hmac_type, self.hmac(data))
    }

    /// Whether the salt was generated rather than loaded
    pub fn did_generate(&self) -> bool {
        self.generated
    }

    /// The salt configuration
    pub fn config(&self) -> &SaltConfig {
        &self.config
    }
}

/// A source of salts
#[async_trait]
pub trait Salter: Send + Sync {
    /// Return the current salt
    async fn salt(&self, ctx: &AuditContext) -> Result<Arc<Salt>>;
}

/// Lazily loaded, storage-backed salt owned by a device
pub struct DeviceSalt {
    view: Arc<dyn Storage>,
    config: SaltConfig,
    cache: ArcSwapOption<Salt>,
    load_lock: Mutex<()>,
}

impl std::fmt::Debug for DeviceSalt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSalt")
            .field("config", &self.config)
            .field("loaded", &self.cache.load().is_some())
            .finish()
    }
}

impl DeviceSalt {
    /// Create an unloaded salt over `view`
    pub fn new(view: Arc<dyn Storage>, config: SaltConfig) -> Self {
        Self {
            view,
            config,
            cache: ArcSwapOption::empty(),
            load_lock: Mutex::new(()),
        }
    }

    /// Drop the cached salt so the next access reloads it
    pub fn invalidate(&self) {
        self.cache.store(None);
    }

    /// Whether a salt is currently cached
    pub fn is_loaded(&self) -> bool {
        self.cache.load().is_some()
    }
}

#[async_trait]
impl Salter for DeviceSalt {
    async fn salt(&self, ctx: &AuditContext) -> Result<Arc<Salt>> {
        if let Some(salt) = self.cache.load_full() {
            return Ok(salt);
        }

        let _guard = self.load_lock.lock().await;
        if let Some(salt) = self.cache.load_full() {
            return Ok(salt);
        }

        let salt = Arc::new(
            Salt::load_or_create(ctx, self.view.as_ref(), self.config.clone()).await?,
        );
        self.cache.store(Some(Arc::clone(&salt)));
        Ok(salt)
    }
}

/// A salter that returns a fresh random salt on every call
#[derive(Debug, Clone, Default)]
pub struct NonPersistentSalt {
    config: SaltConfig,
}

impl NonPersistentSalt {
    /// Create a non-persistent salter
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Salter for NonPersistentSalt {
    async fn salt(&self, _ctx: &AuditContext) -> Result<Arc<Salt>> {
        Ok(Arc::new(Salt::generate(self.config.clone())))
    }
}

/// A salter over a fixed salt
#[derive(Debug, Clone)]
pub struct StaticSalt {
    salt: Arc<Salt>,
}

impl StaticSalt {
    /// Use `value` as the salt
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            salt: Arc::new(Salt::from_value(value, SaltConfig::default())),
        }
    }
}

#[async_trait]
impl Salter for StaticSalt {
    async fn salt(&self, _ctx: &AuditContext) -> Result<Arc<Salt>> {
        Ok(Arc::clone(&self.salt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_device_salt_persists_and_caches() {
        let ctx = AuditContext::root();
        let store: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let salt = DeviceSalt::new(Arc::clone(&store), SaltConfig::default());
        assert!(!salt.is_loaded());

        let first = salt.salt(&ctx).await.unwrap();
        assert!(first.did_generate());
        assert!(salt.is_loaded());
        assert!(store.get(&ctx, "salt").await.unwrap().is_some());

        let second = salt.salt(&ctx).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_invalidate_reloads_same_value() {
        let ctx = AuditContext::root();
        let store: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let salt = DeviceSalt::new(store, SaltConfig::default());

        let before = salt.salt(&ctx).await.unwrap().hmac("foo");
        salt.invalidate();
        assert!(!salt.is_loaded());

        let reloaded = salt.salt(&ctx).await.unwrap();
        assert!(!reloaded.did_generate());
        assert_eq!(reloaded.hmac("foo"), before);
    }

    #[tokio::test]
    async fn test_identified_hmac_format() {
        let salt = StaticSalt::new("s3cr3t")
            .salt(&AuditContext::root())
            .await
            .unwrap();
        let hashed = salt.identified_hmac("foo");
        let hex_part = hashed.strip_prefix("hmac-sha256:").unwrap();
        assert_eq!(hex_part.len(), 64);
        assert_eq!(hex_part, salt.hmac("foo"));
    }

    #[tokio::test]
    async fn test_non_persistent_salt_differs_per_call() {
        let ctx = AuditContext::root();
        let salter = NonPersistentSalt::new();
        let a = salter.salt(&ctx).await.unwrap();
        let b = salter.salt(&ctx).await.unwrap();
        assert_ne!(a.hmac("foo"), b.hmac("foo"));
    }

    proptest! {
        #[test]
        fn prop_hmac_is_deterministic(data in ".*") {
            let salt = Salt::from_value("fixed", SaltConfig::default());
            prop_assert_eq!(salt.hmac(&data), salt.hmac(&data));
        }

        #[test]
        fn prop_distinct_salts_give_distinct_hmacs(a in "[a-z]{8,16}", b in "[a-z]{8,16}", data in ".*") {
            prop_assume!(a != b);
            let s1 = Salt::from_value(a, SaltConfig::default());
            let s2 = Salt::from_value(b, SaltConfig::default());
            prop_assert_ne!(s1.hmac(&data), s2.hmac(&data));
        }
    }
}
