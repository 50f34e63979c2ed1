//! Command-line interface

use crate::config::Config;
use crate::server;
use crate::skill::SkillCatalog;
use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "opsgate", version, about = "Tool-calling agent gateway for server operations")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the gateway server
    Serve {
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        hostname: String,

        /// Port to listen on
        #[arg(long, default_value_t = 8765)]
        port: u16,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// List available skills and their actions
    Skills,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Write a default global config file
    Init,
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve { hostname, port } => {
            let config = Config::load().await?;
            server::serve(&hostname, port, config).await
        }
        Command::Config { action } => match action {
            ConfigAction::Show => {
                let mut config = Config::load().await?;
                // Never print the key itself.
                if config.provider.api_key.is_some() {
                    config.provider.api_key = Some("<set>".to_string());
                }
                println!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigAction::Init => Config::init_default().await,
        },
        Command::Skills => {
            let catalog = SkillCatalog::builtin();
            let all: Vec<String> = catalog.skills().iter().map(|s| s.id.to_string()).collect();
            println!("{}", catalog.descriptions(&all));
            Ok(())
        }
    }
}
