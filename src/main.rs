use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod sync;

use commands::{
    CategoryCommand, CategorySubcommand, ConfigCommand, ProductCommand, ProductSubcommand,
    SyncCommand, WatchCommand,
};
use config::Config;
use shelfsync_core::LocalStore;
use sync::try_auto_sync;

#[derive(Parser)]
#[command(name = "shelf")]
#[command(version)]
#[command(about = "Offline-first inventory with server sync", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage product categories
    Category(CategoryCommand),

    /// Manage products and their images
    Product(ProductCommand),

    /// Sync with remote server
    Sync(SyncCommand),

    /// Keep syncing in the foreground until Ctrl-C
    Watch(WatchCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shelfsync=info,shelfsync_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Kept for `config init` and `config show`
    let cli_config_path = cli.config.clone();

    let config = Config::load(cli.config)?;

    let command = match cli.command {
        Some(command) => command,
        None => {
            println!("Use --help to see available commands");
            return Ok(());
        }
    };

    if let Commands::Config(cmd) = &command {
        return cmd.run(&config, cli_config_path);
    }

    let store = LocalStore::open(&config.database_path.value).await?;

    match &command {
        Commands::Category(cmd) => cmd.run(&store, &config).await?,
        Commands::Product(cmd) => cmd.run(&store, &config).await?,
        Commands::Sync(cmd) => cmd.run(&store, &config).await?,
        Commands::Watch(cmd) => cmd.run(&store, &config).await?,
        Commands::Config(_) => {}
    }

    // Auto-sync AFTER write commands (only reached if the command succeeded)
    if is_write_command(&command) {
        try_auto_sync(&config, &store).await;
    }

    Ok(())
}

/// Returns true if the command changes local data that should be pushed.
fn is_write_command(cmd: &Commands) -> bool {
    matches!(
        cmd,
        Commands::Category(c) if matches!(c.command,
            CategorySubcommand::Create { .. }
            | CategorySubcommand::Update { .. }
            | CategorySubcommand::Delete { .. })
    ) || matches!(
        cmd,
        Commands::Product(p) if matches!(p.command,
            ProductSubcommand::Create { .. }
            | ProductSubcommand::Update { .. }
            | ProductSubcommand::Delete { .. }
            | ProductSubcommand::AddImage { .. }
            | ProductSubcommand::RemoveImage { .. })
    )
}
