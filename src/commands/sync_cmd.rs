//! Sync CLI commands for synchronizing with the entity service.

use clap::{Args, Subcommand};

use shelfsync_core::{EntityType, LocalStore, SyncError, SyncOutcome, SyncReport, SyncStatus};

use crate::config::Config;
use crate::sync::{SyncEngines, SyncSetupError};

/// Sync with remote server
#[derive(Debug, Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,

    /// Only sync one entity type (category or product)
    #[arg(long = "type", value_name = "TYPE")]
    entity_type: Option<EntityType>,

    /// Clear a stuck in-progress flag before syncing
    #[arg(long, short)]
    force: bool,
}

#[derive(Debug, Subcommand)]
enum SyncSubcommand {
    /// Show sync configuration, pending work and connectivity
    Status,
}

impl SyncCommand {
    pub async fn run(&self, store: &LocalStore, config: &Config) -> Result<(), SyncCommandError> {
        match &self.command {
            None => self.sync(store, config).await,
            Some(SyncSubcommand::Status) => self.status(store, config).await,
        }
    }

    async fn sync(&self, store: &LocalStore, config: &Config) -> Result<(), SyncCommandError> {
        let engines = SyncEngines::from_config(store.clone(), &config.sync)?;

        println!("Syncing with server...");
        println!();

        let mut failures = 0;
        for (entity_type, result) in engines.sync(self.entity_type, self.force).await {
            match result {
                Ok(report) => {
                    print_report(&report);
                    if report.has_failures() {
                        failures += 1;
                    }
                }
                Err(e) => {
                    println!("  ✗ {} - {}", entity_type, e);
                    failures += 1;
                }
            }
        }

        println!();
        if failures == 0 {
            println!("Sync complete.");
        } else {
            println!("Sync finished with errors; failed changes will be retried.");
        }

        Ok(())
    }

    async fn status(&self, store: &LocalStore, config: &Config) -> Result<(), SyncCommandError> {
        println!("Sync Configuration");
        println!("==================");
        println!();

        let Some(server_url) = config.sync.server_url.as_ref() else {
            println!("Status: Not configured");
            println!();
            println!("To enable sync, add to your config file:");
            println!();
            println!("  sync:");
            println!("    server_url: \"https://shop.example.com\"");
            println!("    api_key: \"...\"");
            println!();
            println!("Or set environment variables:");
            println!("  SHELF_SYNC_URL");
            println!("  SHELF_SYNC_API_KEY");
            return Ok(());
        };

        println!("Server:    {}", server_url);
        println!(
            "API key:   {}",
            if config.sync.api_key.is_some() {
                "set"
            } else {
                "not set"
            }
        );
        println!(
            "Auto-sync: {}",
            if config.sync.auto_sync {
                "enabled"
            } else {
                "disabled"
            }
        );
        println!("Interval:  {}s", config.sync.interval_secs);
        println!();

        let engines = SyncEngines::from_config(store.clone(), &config.sync)?;
        let statuses = engines.status_all().await?;

        let online = statuses.iter().any(|s| s.online);
        println!(
            "Network:   {}",
            if online { "✓ online" } else { "✗ offline" }
        );
        println!();

        print!("{}", status_table(&statuses));

        Ok(())
    }
}

/// Pending work per entity type. Whether a sync is running is only known
/// inside the process doing it, so there is no state column.
fn status_table(statuses: &[SyncStatus]) -> String {
    let mut out = format!(
        "{:<10}  {:>8}  {:>8}  {:>9}  {:>7}  {:>15}\n",
        "TYPE", "RECORDS", "UNSYNCED", "DELETIONS", "IMAGES", "PENDING IMAGES"
    );
    out.push_str(&"-".repeat(70));
    out.push('\n');
    for status in statuses {
        out.push_str(&format!(
            "{:<10}  {:>8}  {:>8}  {:>9}  {:>7}  {:>15}\n",
            status.entity_type.as_str(),
            status.counts.total_records,
            status.counts.unsynced_records,
            status.counts.pending_deletions,
            status.counts.total_assets,
            status.counts.unsynced_assets,
        ));
    }
    out
}

fn print_report(report: &SyncReport) {
    let symbol = match report.outcome {
        SyncOutcome::Completed if !report.has_failures() => "✓",
        SyncOutcome::Completed => "!",
        SyncOutcome::AlreadyRunning | SyncOutcome::Offline => "-",
    };
    println!("  {} {}", symbol, report);
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    Setup(SyncSetupError),
    SyncError(SyncError),
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::Setup(e) => write!(f, "{}", e),
            SyncCommandError::SyncError(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SyncCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncCommandError::Setup(e) => Some(e),
            SyncCommandError::SyncError(e) => Some(e),
        }
    }
}

impl From<SyncSetupError> for SyncCommandError {
    fn from(e: SyncSetupError) -> Self {
        SyncCommandError::Setup(e)
    }
}

impl From<SyncError> for SyncCommandError {
    fn from(e: SyncError) -> Self {
        SyncCommandError::SyncError(e)
    }
}
