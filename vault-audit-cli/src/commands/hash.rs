use std::path::Path;

use anyhow::Result;
use vault_audit::prelude::*;

use super::{external, load_settings, open_broker};

pub async fn execute(config: Option<&Path>, device: &str, input: &str) -> Result<()> {
    let settings = load_settings(config)?;
    if settings.storage_path.is_none() {
        tracing::warn!("no storage_path configured, hashes use a throwaway salt");
    }

    let ctx = AuditContext::root();
    let broker = open_broker(&settings, &ctx).await?;
    let hash = hash_with(&broker, &ctx, device, input).await?;
    println!("{hash}");
    Ok(())
}

async fn hash_with(
    broker: &Broker,
    ctx: &AuditContext,
    device: &str,
    input: &str,
) -> Result<String> {
    broker.get_hash(ctx, device, input).await.map_err(external)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(dir: &Path) -> Settings {
        Settings {
            storage_path: Some(dir.to_path_buf()),
            devices: vec![DeviceSettings {
                path: "noop/".into(),
                device_type: "noop".into(),
                ..DeviceSettings::default()
            }],
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_hash_is_stable_with_storage() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let ctx = AuditContext::root();

        let first = open_broker(&settings, &ctx).await.unwrap();
        let a = hash_with(&first, &ctx, "noop/", "s.token").await.unwrap();
        let second = open_broker(&settings, &ctx).await.unwrap();
        let b = hash_with(&second, &ctx, "noop/", "s.token").await.unwrap();

        assert_eq!(a, b);
        assert!(a.starts_with("hmac-sha256:"));
    }

    #[tokio::test]
    async fn test_hash_unknown_device() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = AuditContext::root();
        let broker = open_broker(&settings(dir.path()), &ctx).await.unwrap();
        assert!(hash_with(&broker, &ctx, "missing/", "x").await.is_err());
    }
}
