use chrono::Utc;

use super::{format_timestamp, parse_entity_type, parse_optional_timestamp, parse_timestamp, LocalStore};
use crate::error::StoreError;
use crate::models::{ActorContext, DeletionQueueEntry, EntityType};

#[derive(sqlx::FromRow)]
struct DeletionRow {
    id: i64,
    entity_type: String,
    server_id: String,
    entity_local_id: String,
    deleted_at: String,
    actor_id: Option<String>,
    actor_name: Option<String>,
    last_sync_attempt: Option<String>,
    sync_retry_count: i64,
    sync_error: Option<String>,
}

impl LocalStore {
    /// Queued deletions for a type, oldest first.
    pub async fn pending_deletions(
        &self,
        entity_type: EntityType,
    ) -> Result<Vec<DeletionQueueEntry>, StoreError> {
        let rows: Vec<DeletionRow> = sqlx::query_as(
            r#"
            SELECT id, entity_type, server_id, entity_local_id, deleted_at, actor_id, actor_name,
                   last_sync_attempt, sync_retry_count, sync_error
            FROM deletion_queue
            WHERE entity_type = ?
            ORDER BY deleted_at, id
            "#,
        )
        .bind(entity_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(hydrate_deletion).collect()
    }

    pub async fn is_pending_deletion(
        &self,
        entity_type: EntityType,
        server_id: &str,
    ) -> Result<bool, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM deletion_queue WHERE entity_type = ? AND server_id = ?",
        )
        .bind(entity_type.as_str())
        .bind(server_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count > 0)
    }

    /// Drops an acknowledged deletion and any assets still tied to the entity.
    pub async fn acknowledge_deletion(&self, entry: &DeletionQueueEntry) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM assets
            WHERE entity_type = ? AND (entity_local_id = ? OR entity_server_id = ?)
            "#,
        )
        .bind(entry.entity_type.as_str())
        .bind(&entry.entity_local_id)
        .bind(&entry.server_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM deletion_queue WHERE id = ?")
            .bind(entry.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Records a failed delete attempt. The entry stays queued.
    pub async fn record_deletion_failure(&self, id: i64, error: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE deletion_queue SET
                last_sync_attempt = ?,
                sync_retry_count = sync_retry_count + 1,
                sync_error = ?
            WHERE id = ?
            "#,
        )
        .bind(format_timestamp(&Utc::now()))
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn hydrate_deletion(row: DeletionRow) -> Result<DeletionQueueEntry, StoreError> {
    Ok(DeletionQueueEntry {
        id: row.id,
        entity_type: parse_entity_type(&row.entity_type)?,
        server_id: row.server_id,
        entity_local_id: row.entity_local_id,
        deleted_at: parse_timestamp(&row.deleted_at)?,
        actor: ActorContext {
            actor_id: row.actor_id,
            actor_name: row.actor_name,
        },
        last_sync_attempt: parse_optional_timestamp(row.last_sync_attempt.as_deref())?,
        sync_retry_count: row.sync_retry_count,
        sync_error: row.sync_error,
    })
}
