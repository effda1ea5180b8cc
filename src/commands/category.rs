use clap::{Args, Subcommand};

use shelfsync_core::{ActorContext, Category, DeleteOutcome, LocalStore};

use super::{
    confirm, find_record, print_sync_details, sync_label, truncate, OutputFormat,
};
use crate::config::Config;

#[derive(Args)]
pub struct CategoryCommand {
    #[command(subcommand)]
    pub command: CategorySubcommand,
}

#[derive(Subcommand)]
pub enum CategorySubcommand {
    /// Create a new category
    Create {
        /// Name of the category
        name: String,

        /// Description
        #[arg(long)]
        description: Option<String>,
    },

    /// List all categories
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Only show categories with unsynced changes
        #[arg(long)]
        pending: bool,
    },

    /// Show a category's details
    Show {
        /// Local ID, server ID or name
        identifier: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Update an existing category
    Update {
        /// Local ID, server ID or name
        identifier: String,

        /// New name
        #[arg(long)]
        name: Option<String>,

        /// New description
        #[arg(long)]
        description: Option<String>,

        /// Remove the description
        #[arg(long, conflicts_with = "description")]
        clear_description: bool,
    },

    /// Delete a category
    Delete {
        /// Local ID, server ID or name
        identifier: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },
}

impl CategoryCommand {
    pub async fn run(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            CategorySubcommand::Create { name, description } => {
                if name.trim().is_empty() {
                    return Err("Category name cannot be empty".into());
                }

                let mut category = Category::new(name.trim());
                if let Some(description) = description {
                    category = category.with_description(description);
                }

                let created = store.create_record(category).await?;
                println!("Created category:");
                println!("{}", created.fields);
                println!("Local ID: {}", created.local_id);
                Ok(())
            }

            CategorySubcommand::List { format, pending } => {
                let categories = if *pending {
                    store.list_unsynced::<Category>().await?
                } else {
                    store.list_records::<Category>().await?
                };

                if categories.is_empty() {
                    println!("No categories found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&categories)?);
                    }
                    OutputFormat::Text => {
                        println!("{:<36}  {:<30}  STATUS", "ID", "NAME");
                        println!("{}", "-".repeat(80));
                        for record in &categories {
                            println!(
                                "{:<36}  {:<30}  {}",
                                record.local_id,
                                truncate(&record.fields.name, 30),
                                sync_label(record)
                            );
                        }
                        println!("\nTotal: {} category(ies)", categories.len());
                    }
                }
                Ok(())
            }

            CategorySubcommand::Show { identifier, format } => {
                let record = find_record::<Category>(store, identifier)
                    .await?
                    .ok_or_else(|| format!("Category not found: {}", identifier))?;

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&record)?);
                    }
                    OutputFormat::Text => {
                        println!("{}", record.fields);
                        print_sync_details(&record);
                    }
                }
                Ok(())
            }

            CategorySubcommand::Update {
                identifier,
                name,
                description,
                clear_description,
            } => {
                if name.is_none() && description.is_none() && !clear_description {
                    return Err("Nothing to update. Provide at least one option.".into());
                }

                let record = find_record::<Category>(store, identifier)
                    .await?
                    .ok_or_else(|| format!("Category not found: {}", identifier))?;

                let mut category = record.fields.clone();
                if let Some(new_name) = name {
                    if new_name.trim().is_empty() {
                        return Err("Category name cannot be empty".into());
                    }
                    category.name = new_name.trim().to_string();
                }
                if let Some(new_description) = description {
                    category.description = Some(new_description.clone());
                }
                if *clear_description {
                    category.description = None;
                }

                if category == record.fields {
                    println!("No changes to category '{}'", record.fields.name);
                    return Ok(());
                }

                let updated = store.update_record(&record.local_id, category).await?;
                println!("Updated category:");
                println!("{}", updated.fields);
                Ok(())
            }

            CategorySubcommand::Delete { identifier, force } => {
                let record = find_record::<Category>(store, identifier)
                    .await?
                    .ok_or_else(|| format!("Category not found: {}", identifier))?;

                if !force && !confirm(&format!("Delete category '{}'?", record.fields.name))? {
                    println!("Deletion cancelled.");
                    return Ok(());
                }

                let actor = ActorContext::new(config.actor.value.as_str());
                match store.delete_record::<Category>(&record.local_id, &actor).await? {
                    DeleteOutcome::Queued => println!(
                        "Deleted category: {} (server deletion queued)",
                        record.fields.name
                    ),
                    DeleteOutcome::Discarded => {
                        println!("Deleted category: {}", record.fields.name)
                    }
                }
                Ok(())
            }
        }
    }
}
