use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use serde_json::json;
use vault_audit::prelude::*;

use super::{external, load_settings, open_broker};

/// Request path used for synthetic test entries
pub const DEFAULT_TEST_PATH: &str = "sys/audit-test";

pub async fn execute(config: Option<&Path>, device: Option<&str>, path: &str) -> Result<()> {
    let settings = load_settings(config)?;
    let ctx = AuditContext::root();
    let broker = open_broker(&settings, &ctx).await?;

    let targets = match device {
        Some(name) => vec![name.to_string()],
        None => broker.device_names().await,
    };
    if targets.is_empty() {
        anyhow::bail!("No audit devices configured");
    }

    let input = test_input(path);
    let mut failed = 0usize;
    for name in &targets {
        match broker.log_test_message(&ctx, name, &input).await {
            Ok(()) => println!("  {} {}", "✓".green(), name),
            Err(e) => {
                failed += 1;
                println!("  {} {}: {}", "✗".red(), name, e.external());
            }
        }
    }

    if failed > 0 {
        return Err(external(Error::external_options(
            "cli.test_message",
            format!("{failed} of {} audit devices failed", targets.len()),
        )));
    }

    println!(
        "\n{} {}",
        "✓".green().bold(),
        format!("Test message written to {} device(s)", targets.len()).bold()
    );
    Ok(())
}

/// Synthetic update request carried by a test message
pub fn test_input(path: &str) -> LogInput {
    let data = json!({ "test": "message" });
    LogInput::with_request(Request {
        operation: Operation::Update,
        path: path.to_string(),
        data: data.as_object().cloned(),
        ..Request::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_shape() {
        let input = test_input(DEFAULT_TEST_PATH);
        let request = input.request.as_ref().unwrap();
        assert_eq!(request.operation, Operation::Update);
        assert_eq!(request.path, "sys/audit-test");
        assert_eq!(request.data.as_ref().unwrap()["test"], "message");
    }

    #[tokio::test]
    async fn test_message_reaches_file_device() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("audit.log");
        let settings = Settings {
            devices: vec![DeviceSettings {
                path: "file/".into(),
                device_type: "file".into(),
                options: [(
                    "file_path".to_string(),
                    target.to_string_lossy().into_owned(),
                )]
                .into(),
                ..DeviceSettings::default()
            }],
            ..Settings::default()
        };

        let ctx = AuditContext::root();
        let broker = open_broker(&settings, &ctx).await.unwrap();
        broker
            .log_test_message(&ctx, "file/", &test_input("sys/custom-test"))
            .await
            .unwrap();

        let written = std::fs::read_to_string(&target).unwrap();
        let entry: serde_json::Value = serde_json::from_str(written.trim()).unwrap();
        assert_eq!(entry["type"], "request");
        assert_eq!(entry["request"]["path"], "sys/custom-test");
        assert!(entry["request"]["data"]["test"]
            .as_str()
            .unwrap()
            .starts_with("hmac-sha256:"));
    }
}
