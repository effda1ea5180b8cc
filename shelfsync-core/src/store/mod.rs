//! SQLite-backed local store.
//!
//! Three tables hold everything the engine persists:
//! - `records`: one row per entity, discriminated by `entity_type`
//! - `deletion_queue`: deletions of server-known records awaiting acknowledgement
//! - `assets`: binary attachments keyed by the owning record's `local_id`
//!
//! Every public operation touches a single record. Operations that need more
//! than one statement for that record run inside a transaction.

mod assets;
mod deletions;
mod records;

pub use records::DeleteOutcome;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

use crate::error::StoreError;
use crate::models::EntityType;

/// Opens (creating if needed) the database at `path` and runs migrations.
pub async fn init_db(path: &Path) -> Result<SqlitePool, StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(parent.to_path_buf(), e))?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .foreign_keys(true)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Row counts for one entity type, used by the status query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub total_records: i64,
    pub unsynced_records: i64,
    pub pending_deletions: i64,
    pub total_assets: i64,
    pub unsynced_assets: i64,
}

/// Handle to the local database. Cheap to clone.
#[derive(Clone, Debug)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens the database file and runs migrations.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::new(init_db(path).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Counts records, queued deletions and assets for an entity type.
    pub async fn counts(&self, entity_type: EntityType) -> Result<StoreCounts, StoreError> {
        let tag = entity_type.as_str();

        let (total_records, unsynced_records): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(CASE WHEN synced = 0 THEN 1 ELSE 0 END), 0)
            FROM records WHERE entity_type = ?
            "#,
        )
        .bind(tag)
        .fetch_one(&self.pool)
        .await?;

        let (pending_deletions,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM deletion_queue WHERE entity_type = ?")
                .bind(tag)
                .fetch_one(&self.pool)
                .await?;

        let (total_assets, unsynced_assets): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COALESCE(SUM(CASE WHEN synced = 0 THEN 1 ELSE 0 END), 0)
            FROM assets WHERE entity_type = ?
            "#,
        )
        .bind(tag)
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreCounts {
            total_records,
            unsynced_records,
            pending_deletions,
            total_assets,
            unsynced_assets,
        })
    }
}

/// Fixed-width RFC 3339 so equal instants always produce equal strings.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid timestamp '{}': {}", value, e)))
}

pub(crate) fn parse_optional_timestamp(
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.map(parse_timestamp).transpose()
}

pub(crate) fn parse_entity_type(value: &str) -> Result<EntityType, StoreError> {
    value.parse().map_err(StoreError::Corrupt)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    /// A store backed by a throwaway database file.
    pub async fn temp_store() -> (LocalStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalStore::open(&temp_dir.path().join("test.db"))
            .await
            .unwrap();
        (store, temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::temp_store;
    use super::*;
    use crate::models::{ActorContext, Category, Product};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_init_db_creates_tables() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.db");

        let pool = init_db(&db_path).await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(table_names.contains(&"records"));
        assert!(table_names.contains(&"deletion_queue"));
        assert!(table_names.contains(&"assets"));
    }

    #[tokio::test]
    async fn test_open_twice_reuses_schema() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let store = LocalStore::open(&db_path).await.unwrap();
        store.create_record(Category::new("Tools")).await.unwrap();
        drop(store);

        let reopened = LocalStore::open(&db_path).await.unwrap();
        let records = reopened.list_records::<Category>().await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn test_timestamp_format_is_fixed_width() {
        let ts = DateTime::parse_from_rfc3339("2025-03-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_timestamp(&ts), "2025-03-01T10:00:00.000000000Z");
        assert_eq!(parse_timestamp(&format_timestamp(&ts)).unwrap(), ts);
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[tokio::test]
    async fn test_counts_per_entity_type() {
        let (store, _temp) = temp_store().await;

        store.create_record(Category::new("Tools")).await.unwrap();
        let product = store.create_record(Product::new("Hammer", 9.5)).await.unwrap();
        store
            .attach_asset::<Product>(&product.local_id, vec![1, 2], "image/png", "a.png")
            .await
            .unwrap();

        let categories = store.counts(EntityType::Category).await.unwrap();
        assert_eq!(categories.total_records, 1);
        assert_eq!(categories.unsynced_records, 1);
        assert_eq!(categories.total_assets, 0);

        let products = store.counts(EntityType::Product).await.unwrap();
        assert_eq!(products.total_records, 1);
        assert_eq!(products.total_assets, 1);
        assert_eq!(products.unsynced_assets, 1);
        assert_eq!(products.pending_deletions, 0);

        // Never-synced delete leaves nothing queued
        store
            .delete_record::<Product>(&product.local_id, &ActorContext::default())
            .await
            .unwrap();
        let products = store.counts(EntityType::Product).await.unwrap();
        assert_eq!(products, StoreCounts::default());
    }
}
