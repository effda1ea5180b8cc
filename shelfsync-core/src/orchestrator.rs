//! Per-entity-type sync engine.
//!
//! A run has three phases, always in this order:
//! 1. push local creates and edits
//! 2. push queued deletions
//! 3. pull the full server collection and reconcile
//!
//! Per-record failures are stored on the record (or queue entry) and retried
//! on the next run. Only store failures and adapter misconfiguration abort a
//! run.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::adapter::{EntityAdapter, ServerRecord};
use crate::assets::{AssetPayload, AssetSyncer, RefMapping};
use crate::conflict::{resolve, Resolution};
use crate::error::{AdapterError, SyncError};
use crate::models::{Entity, EntityRecord, EntityType};
use crate::network::Connectivity;
use crate::store::{LocalStore, StoreCounts};

/// How a `sync` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed,
    /// Another run for the same entity type was in progress
    AlreadyRunning,
    /// Connectivity check failed; nothing was attempted
    Offline,
}

/// Aggregate result of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub entity_type: EntityType,
    pub outcome: SyncOutcome,
    /// False when a phase failed as a whole (currently only the pull)
    pub success: bool,
    pub error: Option<String>,
    pub pushed: usize,
    pub push_failed: usize,
    pub deleted: usize,
    pub delete_failed: usize,
    pub pulled_new: usize,
    pub pulled_updated: usize,
    /// Unsynced records found to already match the server
    pub confirmed: usize,
    pub removed_upstream: usize,
}

impl SyncReport {
    fn new(entity_type: EntityType, outcome: SyncOutcome) -> Self {
        Self {
            entity_type,
            outcome,
            success: true,
            error: None,
            pushed: 0,
            push_failed: 0,
            deleted: 0,
            delete_failed: 0,
            pulled_new: 0,
            pulled_updated: 0,
            confirmed: 0,
            removed_upstream: 0,
        }
    }

    /// True if any record or deletion failed, or a whole phase failed.
    pub fn has_failures(&self) -> bool {
        !self.success || self.push_failed > 0 || self.delete_failed > 0
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            SyncOutcome::AlreadyRunning => {
                return write!(f, "{}: sync already in progress", self.entity_type)
            }
            SyncOutcome::Offline => return write!(f, "{}: offline, skipped", self.entity_type),
            SyncOutcome::Completed => {}
        }

        write!(
            f,
            "{}: pushed {} ({} failed), deleted {} ({} failed), pulled {} new, {} updated, {} removed",
            self.entity_type,
            self.pushed,
            self.push_failed,
            self.deleted,
            self.delete_failed,
            self.pulled_new,
            self.pulled_updated,
            self.removed_upstream
        )?;
        if let Some(error) = &self.error {
            write!(f, " [error: {}]", error)?;
        }
        Ok(())
    }
}

/// Snapshot for the status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    pub entity_type: EntityType,
    pub counts: StoreCounts,
    pub online: bool,
    pub in_progress: bool,
}

/// Clears the in-progress flag when a run ends, however it ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Sync engine for the entity family handled by `A`.
pub struct SyncOrchestrator<A: EntityAdapter> {
    store: LocalStore,
    assets: AssetSyncer,
    adapter: A,
    connectivity: Arc<dyn Connectivity>,
    in_progress: AtomicBool,
}

impl<A: EntityAdapter> fmt::Debug for SyncOrchestrator<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("entity_type", &self.entity_type())
            .field("in_progress", &self.is_syncing())
            .finish()
    }
}

impl<A: EntityAdapter> SyncOrchestrator<A> {
    pub fn new(store: LocalStore, adapter: A, connectivity: Arc<dyn Connectivity>) -> Self {
        Self {
            assets: AssetSyncer::new(store.clone()),
            store,
            adapter,
            connectivity,
            in_progress: AtomicBool::new(false),
        }
    }

    pub fn entity_type(&self) -> EntityType {
        A::Entity::ENTITY_TYPE
    }

    pub fn is_syncing(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard(&self.in_progress))
    }

    /// Runs one full sync for this entity type.
    ///
    /// Returns immediately if a run is already in progress or the network is
    /// unreachable. Safe to call repeatedly.
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let entity_type = self.entity_type();

        let Some(_guard) = self.try_begin() else {
            tracing::debug!("{} sync already running, skipping", entity_type);
            return Ok(SyncReport::new(entity_type, SyncOutcome::AlreadyRunning));
        };

        if !self.connectivity.is_online().await {
            tracing::info!("Offline, skipping {} sync", entity_type);
            return Ok(SyncReport::new(entity_type, SyncOutcome::Offline));
        }

        let started = Instant::now();
        tracing::info!("Starting {} sync", entity_type);

        let mut report = SyncReport::new(entity_type, SyncOutcome::Completed);
        self.push_changes(&mut report).await?;
        self.push_deletions(&mut report).await?;
        self.pull(&mut report).await?;

        tracing::info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Finished sync: {}",
            report
        );
        Ok(report)
    }

    /// Clears a stuck in-progress flag, then syncs.
    pub async fn force_sync(&self) -> Result<SyncReport, SyncError> {
        if self.in_progress.swap(false, Ordering::SeqCst) {
            tracing::warn!("Clearing in-progress flag for {} sync", self.entity_type());
        }
        self.sync().await
    }

    pub async fn status(&self) -> Result<SyncStatus, SyncError> {
        Ok(SyncStatus {
            entity_type: self.entity_type(),
            counts: self.store.counts(self.entity_type()).await?,
            online: self.connectivity.is_online().await,
            in_progress: self.is_syncing(),
        })
    }

    async fn push_changes(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        let pending = self.store.list_unsynced::<A::Entity>().await?;
        if !pending.is_empty() {
            tracing::debug!("Pushing {} {} record(s)", pending.len(), self.entity_type());
        }

        for record in pending {
            if self.push_record(&record).await? {
                report.pushed += 1;
            } else {
                report.push_failed += 1;
            }
        }

        Ok(())
    }

    /// Pushes one record. Returns whether it ended up acknowledged.
    async fn push_record(&self, record: &EntityRecord<A::Entity>) -> Result<bool, SyncError> {
        let has_assets = self.entity_type().has_assets();
        let payload = if has_assets {
            self.assets.build_payload(&record.local_id).await?
        } else {
            AssetPayload::empty()
        };

        let result = match &record.server_id {
            None => self.adapter.create(&record.fields, &payload).await,
            Some(server_id) => self.adapter.update(server_id, &record.fields, &payload).await,
        };

        let ack = match result {
            Ok(ack) => ack,
            Err(AdapterError::Misconfigured(message)) => return Err(SyncError::Setup(message)),
            Err(e) => {
                tracing::warn!(
                    local_id = %record.local_id,
                    transient = e.is_transient(),
                    "Failed to push {} '{}': {}",
                    self.entity_type(),
                    record.fields.display_name(),
                    e
                );
                self.store
                    .record_push_failure::<A::Entity>(&record.local_id, &e.to_string())
                    .await?;
                return Ok(false);
            }
        };

        if has_assets {
            let mapping = self
                .assets
                .apply_refs(&record.local_id, &ack.server_id, &payload, &ack.asset_refs)
                .await?;

            if let RefMapping::Missing { expected, received } = mapping {
                let message = format!(
                    "server returned {} asset reference(s), expected {}",
                    received, expected
                );
                tracing::warn!(local_id = %record.local_id, "{}", message);
                self.store
                    .record_partial_push::<A::Entity>(
                        &record.local_id,
                        &ack.server_id,
                        ack.updated_at,
                        &message,
                    )
                    .await?;
                return Ok(false);
            }
        }

        self.store
            .record_push_success::<A::Entity>(
                &record.local_id,
                record.last_modified,
                &ack.server_id,
                ack.updated_at,
            )
            .await?;

        tracing::debug!(
            local_id = %record.local_id,
            server_id = %ack.server_id,
            "Pushed {} '{}'",
            self.entity_type(),
            record.fields.display_name()
        );
        Ok(true)
    }

    async fn push_deletions(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        let entries = self.store.pending_deletions(self.entity_type()).await?;

        for entry in entries {
            match self.adapter.delete(&entry.server_id, &entry.actor).await {
                Ok(()) => {
                    self.store.acknowledge_deletion(&entry).await?;
                    report.deleted += 1;
                }
                Err(AdapterError::Misconfigured(message)) => return Err(SyncError::Setup(message)),
                Err(e) => {
                    tracing::warn!(
                        server_id = %entry.server_id,
                        "Failed to delete {} on server: {}",
                        self.entity_type(),
                        e
                    );
                    self.store
                        .record_deletion_failure(entry.id, &e.to_string())
                        .await?;
                    report.delete_failed += 1;
                }
            }
        }

        Ok(())
    }

    async fn pull(&self, report: &mut SyncReport) -> Result<(), SyncError> {
        let server_records = match self.adapter.list().await {
            Ok(records) => records,
            Err(AdapterError::Misconfigured(message)) => return Err(SyncError::Setup(message)),
            Err(e) => {
                tracing::warn!("Failed to pull {} list: {}", self.entity_type(), e);
                report.success = false;
                report.error = Some(format!("pull failed: {}", e));
                return Ok(());
            }
        };

        let mut seen = HashSet::with_capacity(server_records.len());
        for server in server_records {
            seen.insert(server.server_id.clone());

            if self
                .store
                .is_pending_deletion(self.entity_type(), &server.server_id)
                .await?
            {
                tracing::debug!(server_id = %server.server_id, "Skipping record pending deletion");
                continue;
            }

            match self
                .store
                .find_by_server_id::<A::Entity>(&server.server_id)
                .await?
            {
                None => {
                    self.insert_from_server(server).await?;
                    report.pulled_new += 1;
                }
                Some(local) => self.reconcile(local, server, report).await?,
            }
        }

        for local in self.store.list_synced::<A::Entity>().await? {
            let Some(server_id) = &local.server_id else {
                continue;
            };
            if !seen.contains(server_id) {
                tracing::debug!(server_id = %server_id, "Removing record deleted upstream");
                self.store
                    .remove_record::<A::Entity>(&local.local_id)
                    .await?;
                report.removed_upstream += 1;
            }
        }

        Ok(())
    }

    async fn insert_from_server(&self, server: ServerRecord<A::Entity>) -> Result<(), SyncError> {
        let record = EntityRecord::from_server(
            server.server_id.clone(),
            server.fields,
            server.updated_at,
        );
        self.store.insert_record(&record).await?;

        if self.entity_type().has_assets() && !server.asset_refs.is_empty() {
            self.assets
                .refresh_from_server(
                    self.entity_type(),
                    &record.local_id,
                    &server.server_id,
                    &server.asset_refs,
                )
                .await?;
        }

        Ok(())
    }

    async fn reconcile(
        &self,
        local: EntityRecord<A::Entity>,
        server: ServerRecord<A::Entity>,
        report: &mut SyncReport,
    ) -> Result<(), SyncError> {
        match resolve(local.last_modified, server.updated_at) {
            Resolution::TakeServer if local.synced => {
                let applied = self
                    .store
                    .apply_server_state(&local.local_id, &server.fields, server.updated_at)
                    .await?;
                if applied {
                    if self.entity_type().has_assets() {
                        self.assets
                            .refresh_from_server(
                                self.entity_type(),
                                &local.local_id,
                                &server.server_id,
                                &server.asset_refs,
                            )
                            .await?;
                    }
                    report.pulled_updated += 1;
                }
            }
            Resolution::TakeServer => {
                tracing::debug!(
                    local_id = %local.local_id,
                    "Server is newer but local edits are pending, keeping local"
                );
            }
            Resolution::KeepLocal => {
                if local.synced || local.fields != server.fields {
                    return Ok(());
                }
                if self.entity_type().has_assets()
                    && self.assets.has_pending_uploads(&local.local_id).await?
                {
                    return Ok(());
                }
                if self
                    .store
                    .mark_synced_if_unchanged::<A::Entity>(
                        &local.local_id,
                        local.last_modified,
                        server.updated_at,
                    )
                    .await?
                {
                    report.confirmed += 1;
                }
            }
        }

        Ok(())
    }
}
