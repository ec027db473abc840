use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use vault_audit::prelude::*;

use super::{external, load_settings};

pub async fn execute(config: Option<&Path>) -> Result<()> {
    let settings = load_settings(config)?;
    let ctx = AuditContext::root();

    println!("\n{}", "Validating audit devices".bold());
    let problems = validate(&settings, &ctx).await;
    for problem in &problems {
        println!("  {} {}", "✗".red(), problem);
    }

    if !problems.is_empty() {
        return Err(external(Error::external_options(
            "cli.validate",
            format!("{} problem(s) found", problems.len()),
        )));
    }

    println!(
        "\n{} {}",
        "✓".green().bold(),
        format!("{} device(s) valid", settings.devices.len()).bold()
    );
    Ok(())
}

/// Every problem with the configured devices, rendered for operators
///
/// Each device is built on its own so one bad device does not hide another.
pub async fn validate(settings: &Settings, ctx: &AuditContext) -> Vec<String> {
    let mut problems = Vec::new();

    if let Err(e) = settings.edition() {
        problems.push(e.external());
        return problems;
    }
    if let Err(e) = settings.check_distinct() {
        problems.push(e.external());
    }

    for device in &settings.devices {
        let single = Settings {
            devices: vec![device.clone()],
            ..settings.clone()
        };
        match single
            .build_broker(ctx, Arc::new(InMemoryStorage::new()), default_metrics())
            .await
        {
            Ok(_) => println!("  {} {} ({})", "✓".green(), device.path, device.device_type),
            Err(e) => problems.push(format!("{}: {}", device.path, e.external())),
        }
    }

    problems
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_device(path: &str, target: &Path) -> DeviceSettings {
        DeviceSettings {
            path: path.into(),
            device_type: "file".into(),
            options: [(
                "file_path".to_string(),
                target.to_string_lossy().into_owned(),
            )]
            .into(),
            ..DeviceSettings::default()
        }
    }

    #[tokio::test]
    async fn test_valid_settings() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            devices: vec![
                file_device("a/", &dir.path().join("a.log")),
                file_device("b/", &dir.path().join("b.log")),
            ],
            ..Settings::default()
        };
        assert!(validate(&settings, &AuditContext::root()).await.is_empty());
    }

    #[tokio::test]
    async fn test_reports_every_problem() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("shared.log");
        let mut bad_format = file_device("c/", &dir.path().join("c.log"));
        bad_format.options.insert("format".into(), "xml".into());

        let settings = Settings {
            devices: vec![
                file_device("a/", &shared),
                file_device("b/", &shared),
                bad_format,
            ],
            ..Settings::default()
        };
        let problems = validate(&settings, &AuditContext::root()).await;
        assert_eq!(problems.len(), 2);
        assert!(problems[0].contains("file_path already in use"));
        assert!(problems[1].starts_with("c/:"));
    }
}
