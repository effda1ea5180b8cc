use chrono::{DateTime, Utc};

use super::{
    format_timestamp, parse_entity_type, parse_optional_timestamp, parse_timestamp, LocalStore,
};
use crate::error::StoreError;
use crate::models::{next_modified, ActorContext, Entity, EntityRecord};

#[derive(sqlx::FromRow)]
struct RecordRow {
    local_id: String,
    entity_type: String,
    server_id: Option<String>,
    fields: String,
    synced: bool,
    last_modified: String,
    server_updated_at: Option<String>,
    last_sync_attempt: Option<String>,
    sync_retry_count: i64,
    sync_error: Option<String>,
    created_at: String,
}

/// What a local delete did with the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The server knew the record; a deletion entry was queued
    Queued,
    /// The record never reached the server and is simply gone
    Discarded,
}

const SELECT_RECORD: &str = r#"
    SELECT local_id, entity_type, server_id, fields, synced, last_modified,
           server_updated_at, last_sync_attempt, sync_retry_count, sync_error, created_at
    FROM records
"#;

impl LocalStore {
    /// Inserts a record as-is.
    pub async fn insert_record<E: Entity>(
        &self,
        record: &EntityRecord<E>,
    ) -> Result<(), StoreError> {
        let fields = encode_fields(&record.fields)?;

        sqlx::query(
            r#"
            INSERT INTO records (local_id, entity_type, server_id, fields, synced, last_modified,
                                 server_updated_at, last_sync_attempt, sync_retry_count, sync_error, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.local_id)
        .bind(E::ENTITY_TYPE.as_str())
        .bind(&record.server_id)
        .bind(&fields)
        .bind(record.synced)
        .bind(format_timestamp(&record.last_modified))
        .bind(record.server_updated_at.as_ref().map(format_timestamp))
        .bind(record.last_sync_attempt.as_ref().map(format_timestamp))
        .bind(record.sync_retry_count)
        .bind(&record.sync_error)
        .bind(format_timestamp(&record.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Creates a new, never-synced record.
    pub async fn create_record<E: Entity>(&self, fields: E) -> Result<EntityRecord<E>, StoreError> {
        let record = EntityRecord::new(fields);
        self.insert_record(&record).await?;
        tracing::debug!(
            entity_type = E::ENTITY_TYPE.as_str(),
            local_id = %record.local_id,
            "Created local record"
        );
        Ok(record)
    }

    pub async fn get_record<E: Entity>(
        &self,
        local_id: &str,
    ) -> Result<Option<EntityRecord<E>>, StoreError> {
        let row: Option<RecordRow> =
            sqlx::query_as(&format!("{} WHERE entity_type = ? AND local_id = ?", SELECT_RECORD))
                .bind(E::ENTITY_TYPE.as_str())
                .bind(local_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(hydrate_record).transpose()
    }

    pub async fn find_by_server_id<E: Entity>(
        &self,
        server_id: &str,
    ) -> Result<Option<EntityRecord<E>>, StoreError> {
        let row: Option<RecordRow> =
            sqlx::query_as(&format!("{} WHERE entity_type = ? AND server_id = ?", SELECT_RECORD))
                .bind(E::ENTITY_TYPE.as_str())
                .bind(server_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(hydrate_record).transpose()
    }

    /// All records of a type in creation order.
    pub async fn list_records<E: Entity>(&self) -> Result<Vec<EntityRecord<E>>, StoreError> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "{} WHERE entity_type = ? ORDER BY created_at, rowid",
            SELECT_RECORD
        ))
        .bind(E::ENTITY_TYPE.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(hydrate_record).collect()
    }

    /// Records with local changes the server has not seen, oldest first.
    pub async fn list_unsynced<E: Entity>(&self) -> Result<Vec<EntityRecord<E>>, StoreError> {
        self.list_by_synced(false).await
    }

    pub async fn list_synced<E: Entity>(&self) -> Result<Vec<EntityRecord<E>>, StoreError> {
        self.list_by_synced(true).await
    }

    async fn list_by_synced<E: Entity>(
        &self,
        synced: bool,
    ) -> Result<Vec<EntityRecord<E>>, StoreError> {
        let rows: Vec<RecordRow> = sqlx::query_as(&format!(
            "{} WHERE entity_type = ? AND synced = ? ORDER BY created_at, rowid",
            SELECT_RECORD
        ))
        .bind(E::ENTITY_TYPE.as_str())
        .bind(synced)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(hydrate_record).collect()
    }

    /// Replaces a record's fields as a local edit.
    ///
    /// Bumps `last_modified` and clears `synced` so the next sync pushes it.
    pub async fn update_record<E: Entity>(
        &self,
        local_id: &str,
        fields: E,
    ) -> Result<EntityRecord<E>, StoreError> {
        let encoded = encode_fields(&fields)?;
        let mut record = self
            .get_record::<E>(local_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(local_id.to_string()))?;

        record.fields = fields;
        record.last_modified = next_modified(record.last_modified);
        record.synced = false;

        sqlx::query(
            r#"
            UPDATE records SET fields = ?, last_modified = ?, synced = 0
            WHERE entity_type = ? AND local_id = ?
            "#,
        )
        .bind(encoded)
        .bind(format_timestamp(&record.last_modified))
        .bind(E::ENTITY_TYPE.as_str())
        .bind(local_id)
        .execute(&self.pool)
        .await?;

        Ok(record)
    }

    /// Deletes a record locally.
    ///
    /// A record the server knows about moves into the deletion queue and its
    /// assets stay until the server acknowledges. A record that never synced
    /// is dropped together with its assets.
    pub async fn delete_record<E: Entity>(
        &self,
        local_id: &str,
        actor: &ActorContext,
    ) -> Result<DeleteOutcome, StoreError> {
        let record = self
            .get_record::<E>(local_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(local_id.to_string()))?;

        let mut tx = self.pool.begin().await?;

        let outcome = match &record.server_id {
            Some(server_id) => {
                sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO deletion_queue
                        (entity_type, server_id, entity_local_id, deleted_at, actor_id, actor_name)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(E::ENTITY_TYPE.as_str())
                .bind(server_id)
                .bind(&record.local_id)
                .bind(format_timestamp(&Utc::now()))
                .bind(&actor.actor_id)
                .bind(&actor.actor_name)
                .execute(&mut *tx)
                .await?;
                DeleteOutcome::Queued
            }
            None => {
                sqlx::query("DELETE FROM assets WHERE entity_local_id = ?")
                    .bind(&record.local_id)
                    .execute(&mut *tx)
                    .await?;
                DeleteOutcome::Discarded
            }
        };

        sqlx::query("DELETE FROM records WHERE entity_type = ? AND local_id = ?")
            .bind(E::ENTITY_TYPE.as_str())
            .bind(&record.local_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!(
            entity_type = E::ENTITY_TYPE.as_str(),
            local_id = %record.local_id,
            outcome = ?outcome,
            "Deleted local record"
        );

        Ok(outcome)
    }

    /// Removes a record and its assets without queueing anything.
    pub async fn remove_record<E: Entity>(&self, local_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM assets WHERE entity_local_id = ?")
            .bind(local_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM records WHERE entity_type = ? AND local_id = ?")
            .bind(E::ENTITY_TYPE.as_str())
            .bind(local_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Records a successful push.
    ///
    /// `pushed_modified` is the `last_modified` value that was sent. If the
    /// record was edited again while the request was in flight the newer edit
    /// stays pending: the server id and timestamp are still stored but
    /// `synced` remains false.
    pub async fn record_push_success<E: Entity>(
        &self,
        local_id: &str,
        pushed_modified: DateTime<Utc>,
        server_id: &str,
        server_updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let settled_modified = pushed_modified.max(server_updated_at);
        let pushed = format_timestamp(&pushed_modified);

        sqlx::query(
            r#"
            UPDATE records SET
                server_id = COALESCE(server_id, ?1),
                server_updated_at = ?2,
                synced = CASE WHEN last_modified = ?3 THEN 1 ELSE 0 END,
                last_modified = CASE WHEN last_modified = ?3 THEN ?4 ELSE last_modified END,
                last_sync_attempt = ?5,
                sync_retry_count = 0,
                sync_error = NULL
            WHERE entity_type = ?6 AND local_id = ?7
            "#,
        )
        .bind(server_id)
        .bind(format_timestamp(&server_updated_at))
        .bind(&pushed)
        .bind(format_timestamp(&settled_modified))
        .bind(format_timestamp(&Utc::now()))
        .bind(E::ENTITY_TYPE.as_str())
        .bind(local_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Stores the server id of a record whose push succeeded but whose
    /// bookkeeping could not be completed (e.g. missing asset references).
    /// The record stays unsynced with `error` recorded.
    pub async fn record_partial_push<E: Entity>(
        &self,
        local_id: &str,
        server_id: &str,
        server_updated_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE records SET
                server_id = COALESCE(server_id, ?),
                server_updated_at = ?,
                synced = 0,
                last_sync_attempt = ?,
                sync_retry_count = sync_retry_count + 1,
                sync_error = ?
            WHERE entity_type = ? AND local_id = ?
            "#,
        )
        .bind(server_id)
        .bind(format_timestamp(&server_updated_at))
        .bind(format_timestamp(&Utc::now()))
        .bind(error)
        .bind(E::ENTITY_TYPE.as_str())
        .bind(local_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records a failed push attempt. The record stays unsynced.
    pub async fn record_push_failure<E: Entity>(
        &self,
        local_id: &str,
        error: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE records SET
                last_sync_attempt = ?,
                sync_retry_count = sync_retry_count + 1,
                sync_error = ?
            WHERE entity_type = ? AND local_id = ?
            "#,
        )
        .bind(format_timestamp(&Utc::now()))
        .bind(error)
        .bind(E::ENTITY_TYPE.as_str())
        .bind(local_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Overwrites a synced record with newer server state.
    ///
    /// Returns false without touching anything when the record has pending
    /// local edits.
    pub async fn apply_server_state<E: Entity>(
        &self,
        local_id: &str,
        fields: &E,
        server_updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let updated_at = format_timestamp(&server_updated_at);

        let result = sqlx::query(
            r#"
            UPDATE records SET fields = ?, last_modified = ?, server_updated_at = ?
            WHERE entity_type = ? AND local_id = ? AND synced = 1
            "#,
        )
        .bind(encode_fields(fields)?)
        .bind(&updated_at)
        .bind(&updated_at)
        .bind(E::ENTITY_TYPE.as_str())
        .bind(local_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Flags an unsynced record as synced when nothing changed since
    /// `expected_modified` was read.
    pub async fn mark_synced_if_unchanged<E: Entity>(
        &self,
        local_id: &str,
        expected_modified: DateTime<Utc>,
        server_updated_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE records SET synced = 1, server_updated_at = ?, sync_error = NULL, sync_retry_count = 0
            WHERE entity_type = ? AND local_id = ? AND synced = 0 AND last_modified = ?
            "#,
        )
        .bind(format_timestamp(&server_updated_at))
        .bind(E::ENTITY_TYPE.as_str())
        .bind(local_id)
        .bind(format_timestamp(&expected_modified))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn encode_fields<E: Entity>(fields: &E) -> Result<String, StoreError> {
    fields.validate().map_err(|message| StoreError::Invalid {
        entity_type: E::ENTITY_TYPE.as_str(),
        message,
    })?;
    Ok(serde_json::to_string(fields)?)
}

fn hydrate_record<E: Entity>(row: RecordRow) -> Result<EntityRecord<E>, StoreError> {
    let entity_type = parse_entity_type(&row.entity_type)?;
    if entity_type != E::ENTITY_TYPE {
        return Err(StoreError::Corrupt(format!(
            "record {} is a {}, expected {}",
            row.local_id,
            entity_type,
            E::ENTITY_TYPE
        )));
    }

    Ok(EntityRecord {
        fields: serde_json::from_str(&row.fields)?,
        server_id: row.server_id,
        synced: row.synced,
        last_modified: parse_timestamp(&row.last_modified)?,
        server_updated_at: parse_optional_timestamp(row.server_updated_at.as_deref())?,
        last_sync_attempt: parse_optional_timestamp(row.last_sync_attempt.as_deref())?,
        sync_retry_count: row.sync_retry_count,
        sync_error: row.sync_error,
        created_at: parse_timestamp(&row.created_at)?,
        local_id: row.local_id,
    })
}
