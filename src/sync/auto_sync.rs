//! Auto-sync after write commands.
//!
//! Runs only when `auto_sync` is enabled and a server is configured. Any
//! failure is logged and swallowed so local writes never fail because the
//! server is unreachable.

use shelfsync_core::{LocalStore, SyncOutcome};

use crate::config::Config;
use crate::sync::SyncEngines;

/// Syncs every entity family if auto-sync is enabled.
pub async fn try_auto_sync(config: &Config, store: &LocalStore) {
    if !config.sync.auto_sync || !config.sync.is_configured() {
        return;
    }

    let engines = match SyncEngines::from_config(store.clone(), &config.sync) {
        Ok(engines) => engines,
        Err(e) => {
            tracing::warn!("Auto-sync: {}", e);
            return;
        }
    };

    for (entity_type, result) in engines.sync(None, false).await {
        match result {
            Ok(report) if report.outcome == SyncOutcome::Offline => {
                tracing::info!("Auto-sync: offline, {} changes stay queued", entity_type);
            }
            Ok(report) if report.has_failures() => {
                tracing::warn!("Auto-sync: {}", report);
            }
            Ok(report) => {
                tracing::debug!("Auto-sync: {}", report);
            }
            Err(e) => {
                tracing::warn!("Auto-sync: {} sync failed: {}", entity_type, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigSource, ConfigValue, SyncConfig};
    use shelfsync_core::Category;
    use tempfile::TempDir;

    fn config_for(temp_dir: &TempDir, sync: SyncConfig) -> Config {
        Config {
            database_path: ConfigValue::new(temp_dir.path().join("test.db"), ConfigSource::Default),
            actor: ConfigValue::new("tester".to_string(), ConfigSource::Default),
            config_file: None,
            sync,
        }
    }

    #[tokio::test]
    async fn test_disabled_auto_sync_leaves_records_pending() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_for(
            &temp_dir,
            SyncConfig {
                server_url: Some("http://127.0.0.1:9".to_string()),
                auto_sync: false,
                ..SyncConfig::default()
            },
        );
        let store = LocalStore::open(&config.database_path.value).await.unwrap();
        store.create_record(Category::new("Tools")).await.unwrap();

        try_auto_sync(&config, &store).await;

        let pending = store.list_unsynced::<Category>().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].last_sync_attempt.is_none());
    }

    #[tokio::test]
    async fn test_misconfigured_server_is_swallowed() {
        let temp_dir = TempDir::new().unwrap();
        let config = config_for(
            &temp_dir,
            SyncConfig {
                server_url: Some("not-a-url".to_string()),
                auto_sync: true,
                ..SyncConfig::default()
            },
        );
        let store = LocalStore::open(&config.database_path.value).await.unwrap();
        store.create_record(Category::new("Tools")).await.unwrap();

        try_auto_sync(&config, &store).await;

        assert_eq!(store.list_unsynced::<Category>().await.unwrap().len(), 1);
    }
}
