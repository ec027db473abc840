use std::path::Path;

use anyhow::{Context, Result};
use vault_audit::prelude::*;

pub mod hash;
pub mod test_message;
pub mod validate;

/// Load settings from `config`, or from the default locations when unset
pub fn load_settings(config: Option<&Path>) -> Result<Settings> {
    let settings = match config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .map_err(external)?;
    init_tracing(&settings);
    Ok(settings)
}

/// Build a broker with every configured device registered
pub async fn open_broker(settings: &Settings, ctx: &AuditContext) -> Result<Broker> {
    settings
        .build_broker(ctx, settings.storage(), default_metrics())
        .await
        .map_err(external)
        .context("Failed to register audit devices")
}

/// Operator-facing rendering of a library error
pub fn external(err: Error) -> anyhow::Error {
    anyhow::anyhow!(err.external())
}
