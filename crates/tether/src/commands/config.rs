use anyhow::{Context, Result};
use clap::Subcommand;

use tether::config::ClientConfig;

use crate::CommonOpts;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Output the effective configuration
    Show,
    /// Print the resolved config file path
    Path,
}

pub fn handle(common: &CommonOpts, config: &ClientConfig, command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            if common.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(config).context("serializing config to JSON")?
                );
            } else {
                print!("{}", config.to_toml().context("serializing config to TOML")?);
            }
            Ok(())
        }
        ConfigCommand::Path => {
            match common.config_path()? {
                Some(path) => println!("{}", path.display()),
                None => println!("(no config directory)"),
            }
            Ok(())
        }
    }
}
