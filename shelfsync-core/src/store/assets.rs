use chrono::Utc;

use super::{format_timestamp, parse_entity_type, parse_timestamp, LocalStore};
use crate::error::StoreError;
use crate::models::{next_modified, AssetData, AssetOrigin, AssetRecord, Entity, EntityType};

#[derive(sqlx::FromRow)]
struct AssetRow {
    local_id: String,
    entity_type: String,
    entity_local_id: String,
    entity_server_id: Option<String>,
    position: i64,
    origin: String,
    content_type: Option<String>,
    filename: Option<String>,
    data: Option<Vec<u8>>,
    url: Option<String>,
    synced: bool,
    created_at: String,
}

const SELECT_ASSET: &str = r#"
    SELECT local_id, entity_type, entity_local_id, entity_server_id, position, origin,
           content_type, filename, data, url, synced, created_at
    FROM assets
"#;

impl LocalStore {
    pub async fn insert_asset(&self, asset: &AssetRecord) -> Result<(), StoreError> {
        let (content_type, filename, data, url) = match &asset.data {
            AssetData::Blob {
                bytes,
                content_type,
                filename,
            } => (
                Some(content_type.as_str()),
                Some(filename.as_str()),
                Some(bytes.as_slice()),
                None,
            ),
            AssetData::Remote { url } => (None, None, None, Some(url.as_str())),
        };

        sqlx::query(
            r#"
            INSERT INTO assets (local_id, entity_type, entity_local_id, entity_server_id, position,
                                origin, content_type, filename, data, url, synced, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&asset.local_id)
        .bind(asset.entity_type.as_str())
        .bind(&asset.entity_local_id)
        .bind(&asset.entity_server_id)
        .bind(asset.position)
        .bind(asset.origin.to_string())
        .bind(content_type)
        .bind(filename)
        .bind(data)
        .bind(url)
        .bind(asset.synced)
        .bind(format_timestamp(&asset.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_asset(&self, local_id: &str) -> Result<Option<AssetRecord>, StoreError> {
        let row: Option<AssetRow> = sqlx::query_as(&format!("{} WHERE local_id = ?", SELECT_ASSET))
            .bind(local_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(hydrate_asset).transpose()
    }

    /// Assets owned by a record, in display/upload order.
    pub async fn assets_for(&self, entity_local_id: &str) -> Result<Vec<AssetRecord>, StoreError> {
        let rows: Vec<AssetRow> = sqlx::query_as(&format!(
            "{} WHERE entity_local_id = ? ORDER BY position, created_at, rowid",
            SELECT_ASSET
        ))
        .bind(entity_local_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(hydrate_asset).collect()
    }

    /// Local captures of a type still waiting for upload.
    pub async fn pending_uploads(
        &self,
        entity_type: EntityType,
    ) -> Result<Vec<AssetRecord>, StoreError> {
        let rows: Vec<AssetRow> = sqlx::query_as(&format!(
            "{} WHERE entity_type = ? AND synced = 0 AND origin = 'local' ORDER BY entity_local_id, position, rowid",
            SELECT_ASSET
        ))
        .bind(entity_type.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(hydrate_asset).collect()
    }

    /// Adds a local image to a record and marks the record for push.
    pub async fn attach_asset<E: Entity>(
        &self,
        entity_local_id: &str,
        bytes: Vec<u8>,
        content_type: &str,
        filename: &str,
    ) -> Result<AssetRecord, StoreError> {
        let owner = self
            .get_record::<E>(entity_local_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(entity_local_id.to_string()))?;

        let (next_position,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM assets WHERE entity_local_id = ?",
        )
        .bind(entity_local_id)
        .fetch_one(&self.pool)
        .await?;

        let mut asset = AssetRecord::local(
            E::ENTITY_TYPE,
            entity_local_id,
            next_position,
            bytes,
            content_type,
            filename,
        );
        asset.entity_server_id = owner.server_id.clone();

        self.insert_asset(&asset).await?;
        self.touch_owner::<E>(entity_local_id, owner.last_modified)
            .await?;

        Ok(asset)
    }

    /// Removes an image from its record and marks the record for push, so
    /// the next update stops listing the reference.
    pub async fn remove_asset<E: Entity>(&self, asset_local_id: &str) -> Result<(), StoreError> {
        let asset = self
            .get_asset(asset_local_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(asset_local_id.to_string()))?;

        let owner = self
            .get_record::<E>(&asset.entity_local_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(asset.entity_local_id.clone()))?;

        sqlx::query("DELETE FROM assets WHERE local_id = ?")
            .bind(asset_local_id)
            .execute(&self.pool)
            .await?;

        self.touch_owner::<E>(&owner.local_id, owner.last_modified)
            .await
    }

    async fn touch_owner<E: Entity>(
        &self,
        local_id: &str,
        previous: chrono::DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE records SET synced = 0, last_modified = ? WHERE entity_type = ? AND local_id = ?",
        )
        .bind(format_timestamp(&next_modified(previous)))
        .bind(E::ENTITY_TYPE.as_str())
        .bind(local_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Turns an uploaded local asset into a server reference.
    pub async fn mark_asset_uploaded(
        &self,
        asset_local_id: &str,
        entity_server_id: &str,
        url: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE assets SET
                origin = 'server', synced = 1, url = ?, data = NULL, entity_server_id = ?
            WHERE local_id = ?
            "#,
        )
        .bind(url)
        .bind(entity_server_id)
        .bind(asset_local_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Records the owner's server id on all of its assets.
    pub async fn set_assets_entity_server_id(
        &self,
        entity_local_id: &str,
        entity_server_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE assets SET entity_server_id = ? WHERE entity_local_id = ?")
            .bind(entity_server_id)
            .bind(entity_local_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Replaces a record's synced assets with the server's reference list.
    ///
    /// Local captures that are still waiting for upload are left alone and
    /// moved after the server references.
    pub async fn replace_server_assets(
        &self,
        entity_type: EntityType,
        entity_local_id: &str,
        entity_server_id: &str,
        urls: &[String],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM assets WHERE entity_local_id = ? AND (synced = 1 OR origin = 'server')",
        )
        .bind(entity_local_id)
        .execute(&mut *tx)
        .await?;

        let created_at = format_timestamp(&Utc::now());
        for (position, url) in urls.iter().enumerate() {
            let asset = AssetRecord::remote(
                entity_type,
                entity_local_id,
                entity_server_id,
                position as i64,
                url.as_str(),
            );

            sqlx::query(
                r#"
                INSERT INTO assets (local_id, entity_type, entity_local_id, entity_server_id,
                                    position, origin, url, synced, created_at)
                VALUES (?, ?, ?, ?, ?, 'server', ?, 1, ?)
                "#,
            )
            .bind(&asset.local_id)
            .bind(entity_type.as_str())
            .bind(entity_local_id)
            .bind(entity_server_id)
            .bind(asset.position)
            .bind(url)
            .bind(&created_at)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE assets SET position = position + ? WHERE entity_local_id = ? AND synced = 0",
        )
        .bind(urls.len() as i64)
        .bind(entity_local_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn hydrate_asset(row: AssetRow) -> Result<AssetRecord, StoreError> {
    let origin: AssetOrigin = row.origin.parse().map_err(StoreError::Corrupt)?;

    let data = match (row.url, row.data) {
        (Some(url), _) => AssetData::Remote { url },
        (None, Some(bytes)) => AssetData::Blob {
            bytes,
            content_type: row
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            filename: row.filename.unwrap_or_else(|| row.local_id.clone()),
        },
        (None, None) => {
            return Err(StoreError::Corrupt(format!(
                "asset {} has neither data nor url",
                row.local_id
            )))
        }
    };

    Ok(AssetRecord {
        entity_type: parse_entity_type(&row.entity_type)?,
        entity_local_id: row.entity_local_id,
        entity_server_id: row.entity_server_id,
        position: row.position,
        origin,
        data,
        synced: row.synced,
        created_at: parse_timestamp(&row.created_at)?,
        local_id: row.local_id,
    })
}
