//! Configuration view and validation commands: `installsync config`.

use anyhow::Result;
use installsync::config::{CONFIG_FILE_NAME, SyncConfig};

use super::super::ConfigCommands;

pub fn cmd_config(config: &SyncConfig, command: Option<ConfigCommands>) -> Result<()> {
    match command {
        None | Some(ConfigCommands::Show) => {
            let mut shown = config.clone();
            if shown.google.client_secret.is_some() {
                shown.google.client_secret = Some("<redacted>".to_string());
            }
            print!("{}", toml::to_string_pretty(&shown)?);
        }
        Some(ConfigCommands::Validate) => {
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in &warnings {
                    println!("  - {}", warning);
                }
            }
        }
        Some(ConfigCommands::Init) => {
            let path = std::path::PathBuf::from(CONFIG_FILE_NAME);
            if path.exists() {
                anyhow::bail!("{} already exists", path.display());
            }
            SyncConfig::default().save(&path)?;
            println!("Wrote default configuration to {}", path.display());
        }
    }
    Ok(())
}
