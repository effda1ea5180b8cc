//! Shelfsync Core Library
//!
//! Offline-first synchronization of inventory data (categories and products
//! with images) between a local SQLite store and a REST entity service.

pub mod adapter;
pub mod assets;
pub mod conflict;
pub mod error;
pub mod models;
pub mod network;
pub mod orchestrator;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::{EntityAdapter, HttpEntityAdapter, PushAck, ServerRecord};
pub use assets::{AssetPayload, AssetSyncer, AssetUpload};
pub use conflict::{resolve, Resolution};
pub use error::{AdapterError, NetworkError, StoreError, SyncError};
pub use models::{
    ActorContext, AssetData, AssetOrigin, AssetRecord, Category, DeletionQueueEntry, Entity,
    EntityRecord, EntityType, Product,
};
pub use network::{Connectivity, HttpProbe, NetworkMonitor, RouteProbePlatform, SubscriptionId};
pub use orchestrator::{SyncOrchestrator, SyncOutcome, SyncReport, SyncStatus};
pub use store::{DeleteOutcome, LocalStore, StoreCounts};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
