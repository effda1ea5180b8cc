//! Test doubles for the entity service and connectivity.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use crate::adapter::{EntityAdapter, PushAck, ServerRecord};
use crate::assets::AssetPayload;
use crate::error::AdapterError;
use crate::models::{next_modified, ActorContext, Entity};
use crate::network::Connectivity;

/// One adapter call, as observed by [`MockAdapter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// Display name of the created entity
    Create(String),
    Update(String),
    Delete(String),
    List,
}

struct Gate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

struct MockState<E> {
    records: Vec<ServerRecord<E>>,
    calls: Vec<Call>,
    payloads: Vec<AssetPayload>,
    deleted_by: Vec<ActorContext>,
    next_id: u64,
    next_server_id: Option<String>,
    clock: DateTime<Utc>,
    failing_creates: HashSet<String>,
    failing_updates: HashSet<String>,
    failing_deletes: HashSet<String>,
    list_error: Option<AdapterError>,
    every_call_error: Option<AdapterError>,
    drop_asset_refs: bool,
    list_gate: Option<Gate>,
}

/// In-memory entity service with scripted failures.
#[derive(Clone)]
pub struct MockAdapter<E> {
    state: Arc<Mutex<MockState<E>>>,
}

impl<E: Entity> MockAdapter<E> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                records: Vec::new(),
                calls: Vec::new(),
                payloads: Vec::new(),
                deleted_by: Vec::new(),
                next_id: 1,
                next_server_id: None,
                clock: Utc::now(),
                failing_creates: HashSet::new(),
                failing_updates: HashSet::new(),
                failing_deletes: HashSet::new(),
                list_error: None,
                every_call_error: None,
                drop_asset_refs: false,
                list_gate: None,
            })),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState<E>> {
        self.state.lock().unwrap()
    }

    /// Adds a record that exists only on the server.
    pub fn seed(&self, server_id: &str, fields: E, updated_at: DateTime<Utc>, refs: &[&str]) {
        self.state().records.push(ServerRecord {
            server_id: server_id.to_string(),
            fields,
            updated_at,
            asset_refs: refs.iter().map(|r| r.to_string()).collect(),
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    pub fn payloads(&self) -> Vec<AssetPayload> {
        self.state().payloads.clone()
    }

    pub fn deleted_by(&self) -> Vec<ActorContext> {
        self.state().deleted_by.clone()
    }

    /// Server id handed to the next create.
    pub fn set_next_server_id(&self, server_id: &str) {
        self.state().next_server_id = Some(server_id.to_string());
    }

    pub fn fail_create_of(&self, display_name: &str) {
        self.state().failing_creates.insert(display_name.to_string());
    }

    pub fn fail_update_of(&self, server_id: &str) {
        self.state().failing_updates.insert(server_id.to_string());
    }

    pub fn fail_delete_of(&self, server_id: &str) {
        self.state().failing_deletes.insert(server_id.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failing_creates.clear();
        state.failing_updates.clear();
        state.failing_deletes.clear();
        state.list_error = None;
        state.every_call_error = None;
    }

    pub fn fail_list(&self, error: AdapterError) {
        self.state().list_error = Some(error);
    }

    pub fn fail_every_call(&self, error: AdapterError) {
        self.state().every_call_error = Some(error);
    }

    /// Makes pushes answer without asset references.
    pub fn drop_asset_refs(&self, drop: bool) {
        self.state().drop_asset_refs = drop;
    }

    /// Holds the next `list` call until `release` is notified. `entered`
    /// fires once the call is parked.
    pub fn pause_next_list(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        self.state().list_gate = Some(Gate {
            entered: Arc::clone(&entered),
            release: Arc::clone(&release),
        });
        (entered, release)
    }

    /// Full reference list the server holds after a push.
    fn stored_refs(server_id: &str, assets: &AssetPayload) -> Vec<String> {
        let mut refs = assets.keep.clone();
        refs.extend(
            assets
                .uploads
                .iter()
                .map(|u| format!("https://cdn.test/{}/{}", server_id, u.filename)),
        );
        refs
    }
}

impl<E: Entity> Default for MockAdapter<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> EntityAdapter for MockAdapter<E> {
    type Entity = E;

    async fn create(&self, fields: &E, assets: &AssetPayload) -> Result<PushAck, AdapterError> {
        let mut state = self.state();
        state.calls.push(Call::Create(fields.display_name().to_string()));
        state.payloads.push(assets.clone());

        if let Some(err) = &state.every_call_error {
            return Err(err.clone());
        }
        if state.failing_creates.contains(fields.display_name()) {
            return Err(AdapterError::Transient("503 Service Unavailable".to_string()));
        }

        let server_id = match state.next_server_id.take() {
            Some(id) => id,
            None => {
                let id = format!("srv-{}", state.next_id);
                state.next_id += 1;
                id
            }
        };
        state.clock = next_modified(state.clock);
        let updated_at = state.clock;

        let stored_refs = Self::stored_refs(&server_id, assets);
        let asset_refs = if state.drop_asset_refs {
            Vec::new()
        } else {
            stored_refs.clone()
        };

        state.records.push(ServerRecord {
            server_id: server_id.clone(),
            fields: fields.clone(),
            updated_at,
            asset_refs: stored_refs,
        });

        Ok(PushAck {
            server_id,
            updated_at,
            asset_refs,
        })
    }

    async fn update(
        &self,
        server_id: &str,
        fields: &E,
        assets: &AssetPayload,
    ) -> Result<PushAck, AdapterError> {
        let mut state = self.state();
        state.calls.push(Call::Update(server_id.to_string()));
        state.payloads.push(assets.clone());

        if let Some(err) = &state.every_call_error {
            return Err(err.clone());
        }
        if state.failing_updates.contains(server_id) {
            return Err(AdapterError::Rejected {
                status: 422,
                message: "validation failed".to_string(),
            });
        }

        state.clock = next_modified(state.clock);
        let updated_at = state.clock;
        let stored_refs = Self::stored_refs(server_id, assets);
        let asset_refs = if state.drop_asset_refs {
            Vec::new()
        } else {
            stored_refs.clone()
        };

        let record = state
            .records
            .iter_mut()
            .find(|r| r.server_id == server_id)
            .ok_or_else(|| AdapterError::Rejected {
                status: 404,
                message: format!("{} not found", server_id),
            })?;
        record.fields = fields.clone();
        record.updated_at = updated_at;
        record.asset_refs = stored_refs;

        Ok(PushAck {
            server_id: server_id.to_string(),
            updated_at,
            asset_refs,
        })
    }

    async fn delete(&self, server_id: &str, actor: &ActorContext) -> Result<(), AdapterError> {
        let mut state = self.state();
        state.calls.push(Call::Delete(server_id.to_string()));

        if let Some(err) = &state.every_call_error {
            return Err(err.clone());
        }
        if state.failing_deletes.contains(server_id) {
            return Err(AdapterError::Transient("connection reset".to_string()));
        }

        state.records.retain(|r| r.server_id != server_id);
        state.deleted_by.push(actor.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ServerRecord<E>>, AdapterError> {
        let gate = {
            let mut state = self.state();
            state.calls.push(Call::List);
            state.list_gate.take()
        };

        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let state = self.state();
        if let Some(err) = &state.every_call_error {
            return Err(err.clone());
        }
        if let Some(err) = &state.list_error {
            return Err(err.clone());
        }
        Ok(state.records.clone())
    }
}

/// Connectivity source with a settable answer.
#[derive(Debug)]
pub struct FakeConnectivity {
    online: AtomicBool,
    checks: AtomicUsize,
}

impl FakeConnectivity {
    pub fn new(online: bool) -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(online),
            checks: AtomicUsize::new(0),
        })
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connectivity for FakeConnectivity {
    async fn is_online(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.online.load(Ordering::SeqCst)
    }
}
