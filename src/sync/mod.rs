//! Wiring between the CLI configuration and the sync engine.
//!
//! One [`SyncOrchestrator`] per entity family, all sharing the local store
//! and a connectivity source. Families sync independently, so a run for
//! "all" drives them concurrently.

pub mod auto_sync;

pub use auto_sync::try_auto_sync;

use std::sync::Arc;

use shelfsync_core::{
    AdapterError, Category, Connectivity, EntityAdapter, EntityType, HttpEntityAdapter,
    LocalStore, NetworkMonitor, Product, SyncError, SyncOrchestrator, SyncReport, SyncStatus,
};

use crate::config::SyncConfig;

/// Builds the connectivity monitor described by the sync settings.
pub fn network_monitor(sync: &SyncConfig) -> NetworkMonitor {
    NetworkMonitor::with_http_probes(&sync.probe_urls, sync.probe_timeout())
}

/// Sync engines for every entity family.
pub struct SyncEngines {
    pub categories: SyncOrchestrator<HttpEntityAdapter<Category>>,
    pub products: SyncOrchestrator<HttpEntityAdapter<Product>>,
}

impl SyncEngines {
    pub fn new(
        store: LocalStore,
        sync: &SyncConfig,
        connectivity: Arc<dyn Connectivity>,
    ) -> Result<Self, SyncSetupError> {
        let server_url = sync
            .server_url
            .as_deref()
            .ok_or(SyncSetupError::NotConfigured)?;
        let timeout = sync.request_timeout();

        let categories =
            HttpEntityAdapter::<Category>::new(server_url, sync.api_key.clone(), timeout)?;
        let products =
            HttpEntityAdapter::<Product>::new(server_url, sync.api_key.clone(), timeout)?;

        Ok(Self {
            categories: SyncOrchestrator::new(store.clone(), categories, Arc::clone(&connectivity)),
            products: SyncOrchestrator::new(store, products, connectivity),
        })
    }

    /// Engines checking connectivity with a fresh [`NetworkMonitor`].
    pub fn from_config(store: LocalStore, sync: &SyncConfig) -> Result<Self, SyncSetupError> {
        Self::new(store, sync, Arc::new(network_monitor(sync)))
    }

    /// Syncs one family, or all of them concurrently when `only` is `None`.
    pub async fn sync(
        &self,
        only: Option<EntityType>,
        force: bool,
    ) -> Vec<(EntityType, Result<SyncReport, SyncError>)> {
        match only {
            Some(EntityType::Category) => {
                vec![(EntityType::Category, run(&self.categories, force).await)]
            }
            Some(EntityType::Product) => {
                vec![(EntityType::Product, run(&self.products, force).await)]
            }
            None => {
                let (categories, products) = tokio::join!(
                    run(&self.categories, force),
                    run(&self.products, force)
                );
                vec![
                    (EntityType::Category, categories),
                    (EntityType::Product, products),
                ]
            }
        }
    }

    pub async fn status_all(&self) -> Result<Vec<SyncStatus>, SyncError> {
        let (categories, products) =
            tokio::try_join!(self.categories.status(), self.products.status())?;
        Ok(vec![categories, products])
    }
}

async fn run<A: EntityAdapter>(
    engine: &SyncOrchestrator<A>,
    force: bool,
) -> Result<SyncReport, SyncError> {
    if force {
        engine.force_sync().await
    } else {
        engine.sync().await
    }
}

/// Errors building the sync engines
#[derive(Debug)]
pub enum SyncSetupError {
    NotConfigured,
    Adapter(AdapterError),
}

impl std::fmt::Display for SyncSetupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncSetupError::NotConfigured => write!(
                f,
                "Sync is not configured. Set sync.server_url in the config file or SHELF_SYNC_URL."
            ),
            SyncSetupError::Adapter(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SyncSetupError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncSetupError::NotConfigured => None,
            SyncSetupError::Adapter(e) => Some(e),
        }
    }
}

impl From<AdapterError> for SyncSetupError {
    fn from(e: AdapterError) -> Self {
        SyncSetupError::Adapter(e)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use async_trait::async_trait;
    use shelfsync_core::Connectivity;

    /// Connectivity source that never reports a network.
    pub struct Offline;

    #[async_trait]
    impl Connectivity for Offline {
        async fn is_online(&self) -> bool {
            false
        }
    }

    pub fn offline() -> Arc<dyn Connectivity> {
        Arc::new(Offline)
    }
}
