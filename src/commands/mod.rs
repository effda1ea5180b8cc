mod category;
mod config_cmd;
mod product;
mod sync_cmd;
mod watch;

pub use category::{CategoryCommand, CategorySubcommand};
pub use config_cmd::ConfigCommand;
pub use product::{ProductCommand, ProductSubcommand};
pub use sync_cmd::SyncCommand;
pub use watch::WatchCommand;

use chrono::{DateTime, Local, Utc};
use clap::ValueEnum;
use std::io::{self, Write};
use uuid::Uuid;

use shelfsync_core::{Entity, EntityRecord, LocalStore, StoreError};

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Finds a record by local id, server id, or name (case-insensitive).
pub(crate) async fn find_record<E: Entity>(
    store: &LocalStore,
    identifier: &str,
) -> Result<Option<EntityRecord<E>>, StoreError> {
    if Uuid::parse_str(identifier).is_ok() {
        if let Some(record) = store.get_record::<E>(identifier).await? {
            return Ok(Some(record));
        }
    }
    if let Some(record) = store.find_by_server_id::<E>(identifier).await? {
        return Ok(Some(record));
    }

    let name = identifier.to_lowercase();
    Ok(store
        .list_records::<E>()
        .await?
        .into_iter()
        .find(|r| r.fields.display_name().to_lowercase() == name))
}

/// One-word sync state for listings.
pub(crate) fn sync_label<E>(record: &EntityRecord<E>) -> String {
    if record.synced {
        "synced".to_string()
    } else if record.sync_error.is_some() {
        format!("failed ({})", record.sync_retry_count)
    } else {
        "pending".to_string()
    }
}

pub(crate) fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() > width {
        let cut: String = value.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", cut)
    } else {
        value.to_string()
    }
}

/// Sync bookkeeping lines shared by the `show` commands.
pub(crate) fn print_sync_details<E>(record: &EntityRecord<E>) {
    println!("Local ID:      {}", record.local_id);
    println!(
        "Server ID:     {}",
        record.server_id.as_deref().unwrap_or("(not yet synced)")
    );
    println!("Status:        {}", sync_label(record));
    println!("Last modified: {}", local_time(&record.last_modified));
    if let Some(attempt) = &record.last_sync_attempt {
        println!("Last attempt:  {}", local_time(attempt));
    }
    if let Some(error) = &record.sync_error {
        println!("Last error:    {}", error);
    }
}

fn local_time(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

pub(crate) fn confirm(prompt: &str) -> io::Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
