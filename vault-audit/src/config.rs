//! Configuration management using Figment
//!
//! Settings are loaded from multiple sources with the following precedence (highest to lowest):
//! 1. Environment variables (prefix: VAULT_AUDIT_, nested keys split on `__`)
//! 2. An explicitly named TOML file
//! 3. Current working directory: ./vault-audit.toml
//! 4. Default values

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::audit::broker::Broker;
use crate::audit::device::{default_factories, BackendConfig};
use crate::audit::edition::{CommunityEdition, Edition, FilteringEdition};
use crate::audit::headers::HeadersConfig;
use crate::audit::mount::{is_distinct, MountEntry};
use crate::audit::salt::SaltConfig;
use crate::context::AuditContext;
use crate::error::{Error, Result};
use crate::metrics::SharedMetrics;
use crate::storage::{FileStorage, InMemoryStorage, Storage, StorageView};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "VAULT_AUDIT_";

/// Settings file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "vault-audit.toml";

/// Operator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Upper bound on a single audit call in seconds
    #[serde(default = "default_log_timeout_secs")]
    pub log_timeout_secs: u64,

    /// Edition profile: `community` or `filtering`
    #[serde(default = "default_edition")]
    pub edition: String,

    /// Directory holding device salts and the header allowlist
    ///
    /// When unset, state lives in memory and salts change on every start.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,

    /// Audit devices to register
    #[serde(default)]
    pub devices: Vec<DeviceSettings>,
}

/// A configured audit device
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceSettings {
    /// Mount path, e.g. `file/`
    pub path: String,

    /// Device type: file, socket, syslog or noop
    #[serde(rename = "type")]
    pub device_type: String,

    /// Whether the device is local to this node
    #[serde(default)]
    pub local: bool,

    /// Free-form description
    #[serde(default)]
    pub description: String,

    /// Device options
    #[serde(default)]
    pub options: HashMap<String, String>,
}

impl DeviceSettings {
    /// The mount table entry for this device
    pub fn mount_entry(&self) -> MountEntry {
        MountEntry {
            path: self.path.clone(),
            device_type: self.device_type.clone(),
            description: self.description.clone(),
            local: self.local,
            options: self.options.clone(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_timeout_secs: default_log_timeout_secs(),
            edition: default_edition(),
            storage_path: None,
            devices: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_timeout_secs() -> u64 {
    10
}

fn default_edition() -> String {
    "community".to_string()
}

impl Settings {
    /// Load settings from ./vault-audit.toml and the environment
    pub fn load() -> Result<Self> {
        Self::extract(Self::figment(None))
    }

    /// Load settings from a specific file, still honouring the environment
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::external_options(
                "config.Settings.load_from",
                format!("configuration file {} does not exist", path.display()),
            ));
        }
        Self::extract(Self::figment(Some(path.to_path_buf())))
    }

    fn figment(path: Option<PathBuf>) -> Figment {
        let mut figment = Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(DEFAULT_CONFIG_FILE));

        if let Some(path) = path {
            tracing::debug!("Loading configuration from: {}", path.display());
            figment = figment.merge(Toml::file(path));
        }

        // Environment variables have highest priority
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn extract(figment: Figment) -> Result<Self> {
        figment.extract().map_err(|e| {
            Error::external_options("config.Settings.load", "unable to load settings")
                .with_upstream(e)
        })
    }

    /// Audit call timeout
    pub fn log_timeout(&self) -> Duration {
        Duration::from_secs(self.log_timeout_secs)
    }

    /// The configured edition
    pub fn edition(&self) -> Result<Arc<dyn Edition>> {
        match self.edition.trim().to_lowercase().as_str() {
            "community" | "" => Ok(Arc::new(CommunityEdition)),
            "filtering" => Ok(Arc::new(FilteringEdition)),
            other => Err(Error::external_options(
                "config.Settings.edition",
                format!("unknown edition {other:?}"),
            )),
        }
    }

    /// Storage backing salts and headers
    pub fn storage(&self) -> Arc<dyn Storage> {
        match &self.storage_path {
            Some(path) => Arc::new(FileStorage::new(path)),
            None => Arc::new(InMemoryStorage::new()),
        }
    }

    /// Check every pair of configured devices for collisions
    ///
    /// `noop` devices write nothing and are skipped.
    pub fn check_distinct(&self) -> Result<()> {
        let entries: Vec<MountEntry> = self
            .devices
            .iter()
            .filter(|d| !d.device_type.eq_ignore_ascii_case("noop"))
            .map(DeviceSettings::mount_entry)
            .collect();
        for (i, proposed) in entries.iter().enumerate() {
            for existing in &entries[..i] {
                is_distinct(proposed, existing)?;
            }
        }
        Ok(())
    }

    /// Build a broker and register every configured device
    ///
    /// Each device gets its own view of `storage` under `audit/<path>` for
    /// its salt; the header allowlist lives under the root of `storage`.
    pub async fn build_broker(
        &self,
        ctx: &AuditContext,
        storage: Arc<dyn Storage>,
        metrics: SharedMetrics,
    ) -> Result<Broker> {
        const OP: &str = "config.Settings.build_broker";

        self.check_distinct()?;
        let edition = self.edition()?;
        let headers = Arc::new(HeadersConfig::load(ctx, Arc::clone(&storage)).await?);
        let broker = Broker::new(headers, Arc::clone(&edition)).with_timeout(self.log_timeout());
        broker.set_metrics(Arc::clone(&metrics));

        let factories = default_factories(edition);
        for device in &self.devices {
            let device_type = device.device_type.trim().to_lowercase();
            let factory = factories.get(&device_type).ok_or_else(|| {
                Error::external_options(OP, format!("unknown audit device type {device_type:?}"))
            })?;

            let salt_view: Arc<dyn Storage> = Arc::new(StorageView::new(
                Arc::clone(&storage),
                format!("audit/{}", device.path.trim()),
            ));
            let config = BackendConfig {
                mount_path: device.path.clone(),
                salt_config: SaltConfig::default(),
                salt_view,
                config: device.options.clone(),
                metrics: Arc::clone(&metrics),
            };

            let backend = factory
                .create(config, Some(broker.header_formatter()))
                .await?;
            broker.register(backend, device.local).await?;
        }

        Ok(broker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::noop;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.log_timeout(), Duration::from_secs(10));
        assert!(settings.devices.is_empty());
        assert_eq!(settings.edition().unwrap().name(), "community");
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
log_level = "debug"
log_timeout_secs = 3
storage_path = "/var/lib/vault-audit"

[[devices]]
path = "file/"
type = "file"
local = true

[devices.options]
file_path = "/var/log/vault_audit.log"
hmac_accessor = "false"
"#,
        );
        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.log_timeout(), Duration::from_secs(3));
        assert_eq!(
            settings.storage_path.as_deref(),
            Some(Path::new("/var/lib/vault-audit"))
        );
        assert_eq!(settings.devices.len(), 1);
        let device = &settings.devices[0];
        assert_eq!(device.device_type, "file");
        assert!(device.local);
        assert_eq!(device.options["hmac_accessor"], "false");
        assert_eq!(device.mount_entry().file_path(), Some("/var/log/vault_audit.log"));
    }

    #[test]
    fn test_missing_file_and_bad_edition() {
        assert!(Settings::load_from("/nonexistent/vault-audit.toml").is_err());
        let settings = Settings {
            edition: "platinum".into(),
            ..Settings::default()
        };
        assert!(settings.edition().is_err());
    }

    #[test]
    fn test_check_distinct() {
        let file = |path: &str, target: &str| DeviceSettings {
            path: path.into(),
            device_type: "file".into(),
            options: [("file_path".to_string(), target.to_string())].into(),
            ..DeviceSettings::default()
        };
        let noop = DeviceSettings {
            path: "noop/".into(),
            device_type: "noop".into(),
            ..DeviceSettings::default()
        };

        let ok = Settings {
            devices: vec![file("a/", "x"), file("b/", "y"), noop],
            ..Settings::default()
        };
        assert!(ok.check_distinct().is_ok());

        let clash = Settings {
            devices: vec![file("a/", "x"), file("b/", "x")],
            ..Settings::default()
        };
        assert_eq!(
            clash.check_distinct().unwrap_err().message(),
            "file_path already in use on device"
        );
    }

    #[tokio::test]
    async fn test_build_broker() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("audit.log");
        let settings = Settings {
            devices: vec![
                DeviceSettings {
                    path: "file/".into(),
                    device_type: "file".into(),
                    options: [(
                        "file_path".to_string(),
                        target.to_string_lossy().into_owned(),
                    )]
                    .into(),
                    ..DeviceSettings::default()
                },
                DeviceSettings {
                    path: "noop/".into(),
                    device_type: "NOOP".into(),
                    local: true,
                    ..DeviceSettings::default()
                },
            ],
            ..Settings::default()
        };

        let ctx = AuditContext::root();
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let broker = settings
            .build_broker(&ctx, Arc::clone(&storage), noop())
            .await
            .unwrap();
        assert_eq!(broker.device_names().await, vec!["file/", "noop/"]);
        assert!(broker.is_local("noop/").await.unwrap());

        broker.get_hash(&ctx, "file/", "x").await.unwrap();
        assert!(storage.get(&ctx, "audit/file/salt").await.unwrap().is_some());

        let bad = Settings {
            devices: vec![DeviceSettings {
                path: "kafka/".into(),
                device_type: "kafka".into(),
                ..DeviceSettings::default()
            }],
            ..Settings::default()
        };
        assert!(bad.build_broker(&ctx, storage, noop()).await.is_err());
    }

    #[tokio::test]
    async fn test_file_storage_keeps_hashes_stable() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            storage_path: Some(dir.path().join("state")),
            devices: vec![DeviceSettings {
                path: "noop/".into(),
                device_type: "noop".into(),
                ..DeviceSettings::default()
            }],
            ..Settings::default()
        };

        let ctx = AuditContext::root();
        let first = settings
            .build_broker(&ctx, settings.storage(), noop())
            .await
            .unwrap()
            .get_hash(&ctx, "noop/", "token")
            .await
            .unwrap();
        let second = settings
            .build_broker(&ctx, settings.storage(), noop())
            .await
            .unwrap()
            .get_hash(&ctx, "noop/", "token")
            .await
            .unwrap();
        assert_eq!(first, second);
        assert!(first.starts_with("hmac-sha256:"));
    }
}
