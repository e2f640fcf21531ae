//! Configuration view and validation commands: `taskboard config`.

use std::path::Path;

use anyhow::Result;
use taskboard::config::{DEFAULT_CONFIG_FILE, TaskboardConfig};

use super::super::ConfigCommands;

pub fn cmd_config(
    config_path: Option<&Path>,
    config: &TaskboardConfig,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let source = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

    match command {
        None | Some(ConfigCommands::Show) => {
            if source.exists() {
                println!("# Config file: {}", source.display());
            } else {
                println!("# No config file at {}; showing defaults", source.display());
            }
            println!("# Effective values (with env/CLI overrides)");
            print!("{}", config.to_toml()?);
        }
        Some(ConfigCommands::Validate) => {
            let problems = config.validate();
            if problems.is_empty() {
                println!("Configuration is valid.");
            } else {
                for problem in &problems {
                    eprintln!("  - {}", problem);
                }
                anyhow::bail!("{} configuration problem(s) found", problems.len());
            }
        }
        Some(ConfigCommands::Init) => {
            if source.exists() {
                anyhow::bail!("{} already exists", source.display());
            }
            std::fs::write(source, TaskboardConfig::default().to_toml()?)?;
            println!("Wrote {}", source.display());
        }
    }
    Ok(())
}
