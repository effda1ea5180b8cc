//! Upload/reference reconciliation for binary attachments.
//!
//! A push sends two ordered lists: the references of assets the server
//! already has (`keep`) and the raw bytes of local captures (`uploads`).
//! The server answers with the entity's full reference list, kept
//! references first in request order, then one reference per upload in
//! upload order. Uploaded assets are matched to references by position.

use crate::error::StoreError;
use crate::models::{AssetData, AssetRecord, EntityType};
use crate::store::LocalStore;

/// One local capture to send with a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetUpload {
    pub asset_local_id: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub filename: String,
}

/// Assets accompanying a create or update call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetPayload {
    pub uploads: Vec<AssetUpload>,
    /// References the server should retain, in display order
    pub keep: Vec<String>,
}

impl AssetPayload {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.uploads.is_empty() && self.keep.is_empty()
    }

    /// Number of references a complete server answer must contain.
    pub fn expected_refs(&self) -> usize {
        self.keep.len() + self.uploads.len()
    }

    /// Splits an entity's assets into kept references and pending uploads,
    /// preserving their order.
    pub fn partition(assets: &[AssetRecord]) -> Self {
        let mut payload = Self::default();

        for asset in assets {
            match &asset.data {
                AssetData::Remote { url } => payload.keep.push(url.clone()),
                AssetData::Blob {
                    bytes,
                    content_type,
                    filename,
                } if asset.needs_upload() => payload.uploads.push(AssetUpload {
                    asset_local_id: asset.local_id.clone(),
                    bytes: bytes.clone(),
                    content_type: content_type.clone(),
                    filename: filename.clone(),
                }),
                AssetData::Blob { .. } => {
                    tracing::warn!(
                        asset = %asset.local_id,
                        "Synced asset has no server reference, skipping"
                    );
                }
            }
        }

        payload
    }
}

/// Result of matching a server's reference list against a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefMapping {
    /// Every upload was matched; holds the number of assets updated
    Applied(usize),
    /// The server returned fewer references than the payload requires
    Missing { expected: usize, received: usize },
}

/// Asset half of a push, bound to the local store.
#[derive(Debug, Clone)]
pub struct AssetSyncer {
    store: LocalStore,
}

impl AssetSyncer {
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Builds the payload for an entity from its stored assets.
    pub async fn build_payload(&self, entity_local_id: &str) -> Result<AssetPayload, StoreError> {
        let assets = self.store.assets_for(entity_local_id).await?;
        Ok(AssetPayload::partition(&assets))
    }

    pub async fn has_pending_uploads(&self, entity_local_id: &str) -> Result<bool, StoreError> {
        let assets = self.store.assets_for(entity_local_id).await?;
        Ok(assets.iter().any(AssetRecord::needs_upload))
    }

    /// Applies the server's ordered references after a successful push.
    ///
    /// Upload `i` takes reference `keep.len() + i`. When the list is short
    /// nothing is changed and the uploads stay pending.
    pub async fn apply_refs(
        &self,
        entity_local_id: &str,
        entity_server_id: &str,
        payload: &AssetPayload,
        refs: &[String],
    ) -> Result<RefMapping, StoreError> {
        if refs.len() < payload.expected_refs() {
            return Ok(RefMapping::Missing {
                expected: payload.expected_refs(),
                received: refs.len(),
            });
        }

        let upload_refs = &refs[payload.keep.len()..];
        for (upload, url) in payload.uploads.iter().zip(upload_refs) {
            self.store
                .mark_asset_uploaded(&upload.asset_local_id, entity_server_id, url)
                .await?;
        }

        self.store
            .set_assets_entity_server_id(entity_local_id, entity_server_id)
            .await?;

        Ok(RefMapping::Applied(payload.uploads.len()))
    }

    /// Mirrors the server's reference list onto a synced entity.
    pub async fn refresh_from_server(
        &self,
        entity_type: EntityType,
        entity_local_id: &str,
        entity_server_id: &str,
        refs: &[String],
    ) -> Result<(), StoreError> {
        self.store
            .replace_server_assets(entity_type, entity_local_id, entity_server_id, refs)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssetOrigin, EntityRecord, Product};
    use crate::store::test_support::temp_store;
    use chrono::Utc;

    #[test]
    fn test_partition_splits_keep_and_uploads_in_order() {
        let assets = vec![
            AssetRecord::remote(EntityType::Product, "p1", "srv-1", 0, "https://cdn/a.png"),
            AssetRecord::local(EntityType::Product, "p1", 1, vec![1], "image/png", "b.png"),
            AssetRecord::remote(EntityType::Product, "p1", "srv-1", 2, "https://cdn/c.png"),
            AssetRecord::local(EntityType::Product, "p1", 3, vec![2], "image/jpeg", "d.jpg"),
        ];

        let payload = AssetPayload::partition(&assets);

        assert_eq!(payload.keep, vec!["https://cdn/a.png", "https://cdn/c.png"]);
        let names: Vec<&str> = payload.uploads.iter().map(|u| u.filename.as_str()).collect();
        assert_eq!(names, vec!["b.png", "d.jpg"]);
        assert_eq!(payload.uploads[0].asset_local_id, assets[1].local_id);
        assert_eq!(payload.expected_refs(), 4);
    }

    #[test]
    fn test_empty_partition() {
        let payload = AssetPayload::partition(&[]);
        assert!(payload.is_empty());
        assert_eq!(payload, AssetPayload::empty());
    }

    #[tokio::test]
    async fn test_apply_refs_maps_uploads_positionally() {
        let (store, _temp) = temp_store().await;
        let syncer = AssetSyncer::new(store.clone());

        let record = EntityRecord::from_server("srv-1", Product::new("Hammer", 9.0), Utc::now());
        store.insert_record(&record).await.unwrap();
        store
            .replace_server_assets(
                EntityType::Product,
                &record.local_id,
                "srv-1",
                &["https://cdn/kept.png".to_string()],
            )
            .await
            .unwrap();
        let first = store
            .attach_asset::<Product>(&record.local_id, vec![1], "image/png", "one.png")
            .await
            .unwrap();
        let second = store
            .attach_asset::<Product>(&record.local_id, vec![2], "image/png", "two.png")
            .await
            .unwrap();

        let payload = syncer.build_payload(&record.local_id).await.unwrap();
        assert_eq!(payload.keep, vec!["https://cdn/kept.png"]);
        assert_eq!(payload.uploads.len(), 2);

        let refs = vec![
            "https://cdn/kept.png".to_string(),
            "https://cdn/one.png".to_string(),
            "https://cdn/two.png".to_string(),
        ];
        let mapping = syncer
            .apply_refs(&record.local_id, "srv-1", &payload, &refs)
            .await
            .unwrap();
        assert_eq!(mapping, RefMapping::Applied(2));

        let first = store.get_asset(&first.local_id).await.unwrap().unwrap();
        let second = store.get_asset(&second.local_id).await.unwrap().unwrap();
        assert_eq!(first.data.url(), Some("https://cdn/one.png"));
        assert_eq!(second.data.url(), Some("https://cdn/two.png"));
        assert_eq!(first.origin, AssetOrigin::Server);
        assert!(second.synced);
        assert!(!syncer.has_pending_uploads(&record.local_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_apply_refs_with_short_list_changes_nothing() {
        let (store, _temp) = temp_store().await;
        let syncer = AssetSyncer::new(store.clone());

        let record = store.create_record(Product::new("Saw", 3.0)).await.unwrap();
        store
            .attach_asset::<Product>(&record.local_id, vec![1], "image/png", "saw.png")
            .await
            .unwrap();

        let payload = syncer.build_payload(&record.local_id).await.unwrap();
        let mapping = syncer
            .apply_refs(&record.local_id, "srv-2", &payload, &[])
            .await
            .unwrap();

        assert_eq!(
            mapping,
            RefMapping::Missing {
                expected: 1,
                received: 0
            }
        );
        assert!(syncer.has_pending_uploads(&record.local_id).await.unwrap());
    }
}
