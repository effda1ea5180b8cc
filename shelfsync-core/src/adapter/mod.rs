//! The narrow interface the orchestrator uses to reach the entity service.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::assets::AssetPayload;
use crate::error::AdapterError;
use crate::models::{ActorContext, Entity};

pub use http::HttpEntityAdapter;

/// Server acknowledgement of a create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushAck {
    pub server_id: String,
    pub updated_at: DateTime<Utc>,
    /// Full ordered reference list of the entity's assets
    pub asset_refs: Vec<String>,
}

/// One entry of the server's full collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerRecord<E> {
    pub server_id: String,
    pub fields: E,
    pub updated_at: DateTime<Utc>,
    pub asset_refs: Vec<String>,
}

/// Remote CRUD for one entity family.
#[async_trait]
pub trait EntityAdapter: Send + Sync {
    type Entity: Entity;

    async fn create(
        &self,
        fields: &Self::Entity,
        assets: &AssetPayload,
    ) -> Result<PushAck, AdapterError>;

    async fn update(
        &self,
        server_id: &str,
        fields: &Self::Entity,
        assets: &AssetPayload,
    ) -> Result<PushAck, AdapterError>;

    async fn delete(&self, server_id: &str, actor: &ActorContext) -> Result<(), AdapterError>;

    /// Fetches the complete server collection.
    async fn list(&self) -> Result<Vec<ServerRecord<Self::Entity>>, AdapterError>;
}
