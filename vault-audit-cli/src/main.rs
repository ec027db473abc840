use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;

mod commands;

/// vault-audit - Validate and exercise audit devices
#[derive(Parser)]
#[command(name = "vault-audit")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file (defaults to ./vault-audit.toml and VAULT_AUDIT_* variables)
    #[arg(short, long, global = true, value_name = "FILE", env = "VAULT_AUDIT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a synthetic request through configured devices
    TestMessage {
        /// Only test the device mounted at this path
        #[arg(short, long, value_name = "PATH")]
        device: Option<String>,

        /// Request path recorded in the test entry
        #[arg(long, default_value = commands::test_message::DEFAULT_TEST_PATH)]
        path: String,
    },
    /// HMAC a value with a device's salt
    Hash {
        /// Device mount path
        #[arg(short, long, value_name = "PATH")]
        device: String,

        /// Value to hash
        #[arg(value_name = "INPUT")]
        input: String,
    },
    /// Build every device and check that none collide
    Validate,
}

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let cli = Cli::parse();
    let config = cli.config.as_deref();

    // Execute command
    let result = match cli.command {
        Commands::TestMessage { device, path } => {
            commands::test_message::execute(config, device.as_deref(), &path).await
        }
        Commands::Hash { device, input } => commands::hash::execute(config, &device, &input).await,
        Commands::Validate => commands::validate::execute(config).await,
    };

    // Handle result
    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);

            // Show context if available
            if let Some(source) = e.source() {
                eprintln!("\n{} {}", "Caused by:".yellow(), source);
            }

            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_hash() {
        let cli = Cli::parse_from([
            "vault-audit",
            "hash",
            "--config",
            "audit.toml",
            "--device",
            "file/",
            "s.token",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("audit.toml")));
        match cli.command {
            Commands::Hash { device, input } => {
                assert_eq!(device, "file/");
                assert_eq!(input, "s.token");
            }
            _ => panic!("expected hash command"),
        }
    }

    #[test]
    fn test_parse_test_message_defaults() {
        let cli = Cli::parse_from(["vault-audit", "test-message"]);
        match cli.command {
            Commands::TestMessage { device, path } => {
                assert!(device.is_none());
                assert_eq!(path, commands::test_message::DEFAULT_TEST_PATH);
            }
            _ => panic!("expected test-message command"),
        }
    }
}
