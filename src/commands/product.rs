use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

use shelfsync_core::{
    ActorContext, AssetData, AssetRecord, Category, DeleteOutcome, EntityRecord, LocalStore,
    Product,
};

use super::{
    confirm, find_record, print_sync_details, sync_label, truncate, OutputFormat,
};
use crate::config::Config;

#[derive(Args)]
pub struct ProductCommand {
    #[command(subcommand)]
    pub command: ProductSubcommand,
}

#[derive(Subcommand)]
pub enum ProductSubcommand {
    /// Create a new product
    Create {
        /// Name of the product
        name: String,

        /// Unit price
        #[arg(long, default_value_t = 0.0)]
        price: f64,

        /// Quantity in stock
        #[arg(long)]
        quantity: Option<i64>,

        /// Stock keeping unit
        #[arg(long)]
        sku: Option<String>,

        /// Description
        #[arg(long)]
        description: Option<String>,

        /// Category (local ID, server ID or name); must be synced
        #[arg(long)]
        category: Option<String>,

        /// Image file to attach (can be repeated)
        #[arg(long = "image", value_name = "PATH")]
        images: Vec<PathBuf>,
    },

    /// List all products
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Only show products with unsynced changes
        #[arg(long)]
        pending: bool,
    },

    /// Show a product's details and images
    Show {
        /// Local ID, server ID or name
        identifier: String,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Update an existing product
    Update {
        /// Local ID, server ID or name
        identifier: String,

        /// New name
        #[arg(long)]
        name: Option<String>,

        /// New unit price
        #[arg(long)]
        price: Option<f64>,

        /// New quantity in stock
        #[arg(long)]
        quantity: Option<i64>,

        /// New stock keeping unit
        #[arg(long)]
        sku: Option<String>,

        /// New description
        #[arg(long)]
        description: Option<String>,

        /// New category (local ID, server ID or name); must be synced
        #[arg(long)]
        category: Option<String>,
    },

    /// Delete a product and its images
    Delete {
        /// Local ID, server ID or name
        identifier: String,

        /// Skip confirmation prompt
        #[arg(long, short)]
        force: bool,
    },

    /// Attach an image file to a product
    AddImage {
        /// Local ID, server ID or name
        identifier: String,

        /// Path to the image file
        path: PathBuf,
    },

    /// Remove an image from a product
    RemoveImage {
        /// Local ID, server ID or name
        identifier: String,

        /// Image position as shown by `product show` (starting at 1)
        position: usize,
    },
}

#[derive(serde::Serialize)]
struct ProductView<'a> {
    #[serde(flatten)]
    record: &'a EntityRecord<Product>,
    images: Vec<ImageView<'a>>,
}

#[derive(serde::Serialize)]
struct ImageView<'a> {
    local_id: &'a str,
    synced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<&'a str>,
}

impl<'a> From<&'a AssetRecord> for ImageView<'a> {
    fn from(asset: &'a AssetRecord) -> Self {
        let filename = match &asset.data {
            AssetData::Blob { filename, .. } => Some(filename.as_str()),
            AssetData::Remote { .. } => None,
        };
        Self {
            local_id: &asset.local_id,
            synced: asset.synced,
            url: asset.data.url(),
            filename,
        }
    }
}

impl ProductCommand {
    pub async fn run(
        &self,
        store: &LocalStore,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ProductSubcommand::Create {
                name,
                price,
                quantity,
                sku,
                description,
                category,
                images,
            } => {
                if name.trim().is_empty() {
                    return Err("Product name cannot be empty".into());
                }
                check_price(*price)?;

                // Read everything up front so a bad path creates nothing
                let mut files = Vec::with_capacity(images.len());
                for path in images {
                    files.push(read_image(path).await?);
                }

                let mut product = Product::new(name.trim(), *price);
                if let Some(quantity) = quantity {
                    product = product.with_quantity(*quantity);
                }
                if let Some(sku) = sku {
                    product = product.with_sku(sku);
                }
                if let Some(description) = description {
                    product = product.with_description(description);
                }
                if let Some(category) = category {
                    product = product.with_category(resolve_category(store, category).await?);
                }

                let created = store.create_record(product).await?;
                for image in files {
                    store
                        .attach_asset::<Product>(
                            &created.local_id,
                            image.bytes,
                            &image.content_type,
                            &image.filename,
                        )
                        .await?;
                }

                println!("Created product:");
                println!("{}", created.fields);
                println!("Local ID: {}", created.local_id);
                if !images.is_empty() {
                    println!("Images: {}", images.len());
                }
                Ok(())
            }

            ProductSubcommand::List { format, pending } => {
                let products = if *pending {
                    store.list_unsynced::<Product>().await?
                } else {
                    store.list_records::<Product>().await?
                };

                if products.is_empty() {
                    println!("No products found");
                    return Ok(());
                }

                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&products)?);
                    }
                    OutputFormat::Text => {
                        println!(
                            "{:<36}  {:<30}  {:>10}  {:>6}  STATUS",
                            "ID", "NAME", "PRICE", "QTY"
                        );
                        println!("{}", "-".repeat(100));
                        for record in &products {
                            println!(
                                "{:<36}  {:<30}  {:>10.2}  {:>6}  {}",
                                record.local_id,
                                truncate(&record.fields.name, 30),
                                record.fields.price,
                                record.fields.quantity,
                                sync_label(record)
                            );
                        }
                        println!("\nTotal: {} product(s)", products.len());
                    }
                }
                Ok(())
            }

            ProductSubcommand::Show { identifier, format } => {
                let record = find_product(store, identifier).await?;
                let assets = store.assets_for(&record.local_id).await?;

                match format {
                    OutputFormat::Json => {
                        let view = ProductView {
                            record: &record,
                            images: assets.iter().map(ImageView::from).collect(),
                        };
                        println!("{}", serde_json::to_string_pretty(&view)?);
                    }
                    OutputFormat::Text => {
                        println!("{}", record.fields);
                        print_sync_details(&record);

                        if !assets.is_empty() {
                            println!("\nImages:");
                            for (index, asset) in assets.iter().enumerate() {
                                let state = if asset.synced { "synced" } else { "pending" };
                                let location = match &asset.data {
                                    AssetData::Remote { url } => url.as_str(),
                                    AssetData::Blob { filename, .. } => filename.as_str(),
                                };
                                println!("  {}. {} [{}]", index + 1, location, state);
                            }
                        }
                    }
                }
                Ok(())
            }

            ProductSubcommand::Update {
                identifier,
                name,
                price,
                quantity,
                sku,
                description,
                category,
            } => {
                let has_updates = name.is_some()
                    || price.is_some()
                    || quantity.is_some()
                    || sku.is_some()
                    || description.is_some()
                    || category.is_some();

                if !has_updates {
                    return Err("Nothing to update. Provide at least one option.".into());
                }

                let record = find_product(store, identifier).await?;
                let mut product = record.fields.clone();

                if let Some(new_name) = name {
                    if new_name.trim().is_empty() {
                        return Err("Product name cannot be empty".into());
                    }
                    product.name = new_name.trim().to_string();
                }
                if let Some(new_price) = price {
                    check_price(*new_price)?;
                    product.price = *new_price;
                }
                if let Some(new_quantity) = quantity {
                    product.quantity = *new_quantity;
                }
                if let Some(new_sku) = sku {
                    product.sku = Some(new_sku.clone());
                }
                if let Some(new_description) = description {
                    product.description = Some(new_description.clone());
                }
                if let Some(new_category) = category {
                    product.category_id = Some(resolve_category(store, new_category).await?);
                }

                if product == record.fields {
                    println!("No changes to product '{}'", record.fields.name);
                    return Ok(());
                }

                let updated = store.update_record(&record.local_id, product).await?;
                println!("Updated product:");
                println!("{}", updated.fields);
                Ok(())
            }

            ProductSubcommand::Delete { identifier, force } => {
                let record = find_product(store, identifier).await?;

                if !force && !confirm(&format!("Delete product '{}'?", record.fields.name))? {
                    println!("Deletion cancelled.");
                    return Ok(());
                }

                let actor = ActorContext::new(config.actor.value.as_str());
                match store.delete_record::<Product>(&record.local_id, &actor).await? {
                    DeleteOutcome::Queued => println!(
                        "Deleted product: {} (server deletion queued)",
                        record.fields.name
                    ),
                    DeleteOutcome::Discarded => {
                        println!("Deleted product: {}", record.fields.name)
                    }
                }
                Ok(())
            }

            ProductSubcommand::AddImage { identifier, path } => {
                let record = find_product(store, identifier).await?;
                let image = read_image(path).await?;

                let asset = store
                    .attach_asset::<Product>(
                        &record.local_id,
                        image.bytes,
                        &image.content_type,
                        &image.filename,
                    )
                    .await?;

                // Stored positions can have gaps; report the listing index
                let position = store
                    .assets_for(&record.local_id)
                    .await?
                    .iter()
                    .position(|a| a.local_id == asset.local_id)
                    .map_or(0, |index| index + 1);

                println!(
                    "Added image '{}' to '{}' (position {})",
                    image.filename, record.fields.name, position
                );
                Ok(())
            }

            ProductSubcommand::RemoveImage {
                identifier,
                position,
            } => {
                let record = find_product(store, identifier).await?;
                let assets = store.assets_for(&record.local_id).await?;

                let asset = position
                    .checked_sub(1)
                    .and_then(|index| assets.get(index))
                    .ok_or_else(|| {
                        format!(
                            "Product '{}' has no image at position {} ({} image(s))",
                            record.fields.name,
                            position,
                            assets.len()
                        )
                    })?;

                store.remove_asset::<Product>(&asset.local_id).await?;
                println!(
                    "Removed image {} from '{}'",
                    position, record.fields.name
                );
                Ok(())
            }
        }
    }
}

fn check_price(price: f64) -> Result<(), Box<dyn std::error::Error>> {
    if !price.is_finite() {
        return Err(format!("Price must be a finite number, got {}", price).into());
    }
    if price < 0.0 {
        return Err("Price cannot be negative".into());
    }
    Ok(())
}

async fn find_product(
    store: &LocalStore,
    identifier: &str,
) -> Result<EntityRecord<Product>, Box<dyn std::error::Error>> {
    find_record::<Product>(store, identifier)
        .await?
        .ok_or_else(|| format!("Product not found: {}", identifier).into())
}

/// Maps a category identifier to the server id products reference.
async fn resolve_category(
    store: &LocalStore,
    identifier: &str,
) -> Result<String, Box<dyn std::error::Error>> {
    let record = find_record::<Category>(store, identifier)
        .await?
        .ok_or_else(|| format!("Category not found: {}", identifier))?;

    record.server_id.ok_or_else(|| {
        format!(
            "Category '{}' has not been synced yet. Run 'shelf sync' first.",
            record.fields.name
        )
        .into()
    })
}

struct ImageFile {
    bytes: Vec<u8>,
    content_type: String,
    filename: String,
}

async fn read_image(path: &Path) -> Result<ImageFile, Box<dyn std::error::Error>> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| format!("Failed to read image '{}': {}", path.display(), e))?;
    if bytes.is_empty() {
        return Err(format!("Image file is empty: {}", path.display()).into());
    }

    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());

    Ok(ImageFile {
        bytes,
        content_type: content_type_for(path),
        filename,
    })
}

fn content_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
