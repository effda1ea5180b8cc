use clap::{Args, Subcommand};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use super::OutputFormat;
use crate::config::Config;

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Initialize configuration file
    Init,
}

const DEFAULT_CONFIG: &str = r#"# shelfsync configuration

# Path to SQLite database (default: platform data dir, shelfsync/shelfsync.db)
# database_path: shelfsync.db

# Name recorded on deletions sent to the server
actor: default

# sync:
#   server_url: "https://shop.example.com"
#   api_key: "..."
#   auto_sync: false
#   interval_secs: 300
#   request_timeout_secs: 30
#   probe_timeout_secs: 5
"#;

impl ConfigCommand {
    pub fn run(
        &self,
        config: &Config,
        cli_config_path: Option<PathBuf>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(config)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            let path = cli_config_path.unwrap_or_else(Config::default_config_path);
                            println!("Config file: {} (not found)", path.display());
                        }
                        println!();

                        println!("database_path: {}", config.database_path.value.display());
                        println!("  source: {}", config.database_path.source);
                        println!();

                        println!("actor: {}", config.actor.value);
                        println!("  source: {}", config.actor.source);
                        println!();

                        let sync = &config.sync;
                        println!("sync:");
                        println!(
                            "  server_url: {}",
                            sync.server_url.as_deref().unwrap_or("(not set)")
                        );
                        println!(
                            "  api_key: {}",
                            if sync.api_key.is_some() { "(set)" } else { "(not set)" }
                        );
                        println!("  auto_sync: {}", sync.auto_sync);
                        println!("  interval_secs: {}", sync.interval_secs);
                        println!("  request_timeout_secs: {}", sync.request_timeout_secs);
                        println!("  probe_timeout_secs: {}", sync.probe_timeout_secs);
                        println!("  probe_urls:");
                        for url in &sync.probe_urls {
                            println!("    - {}", url);
                        }
                    }
                }
                Ok(())
            }

            ConfigSubcommand::Init => {
                let config_path = cli_config_path.unwrap_or_else(Config::default_config_path);

                if config_path.exists() {
                    println!("Config file already exists: {}", config_path.display());
                    println!("Use 'shelf config show' to view current configuration.");
                    return Ok(());
                }

                if let Some(parent) = config_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                let mut file = fs::File::create(&config_path)?;
                file.write_all(DEFAULT_CONFIG.as_bytes())?;

                println!("Created config file: {}", config_path.display());
                println!("\nEdit this file to customize your settings.");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_init_writes_loadable_config() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("nested").join("config.yaml");
        let config = Config::load(Some(path.clone())).unwrap();

        let command = ConfigCommand {
            command: ConfigSubcommand::Init,
        };
        command.run(&config, Some(path.clone())).unwrap();

        assert!(path.exists());
        let loaded = Config::load(Some(path.clone())).unwrap();
        assert_eq!(loaded.config_file, Some(path));
        assert_eq!(loaded.actor.value, "default");
        assert!(!loaded.sync.is_configured());
    }

    #[test]
    fn test_init_keeps_existing_file() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("config.yaml");
        fs::write(&path, "actor: keep-me\n").unwrap();
        let config = Config::load(Some(path.clone())).unwrap();

        let command = ConfigCommand {
            command: ConfigSubcommand::Init,
        };
        command.run(&config, Some(path.clone())).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "actor: keep-me\n");
    }
}
