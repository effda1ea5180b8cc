use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use uuid::Uuid;

use super::entity_type::EntityType;

/// Domain fields of a syncable entity family.
///
/// Implementors are stored as JSON in the local `records` table and sent
/// as-is to the entity service, so the serde representation is the wire
/// representation.
pub trait Entity:
    Serialize + DeserializeOwned + Clone + PartialEq + Debug + Send + Sync + 'static
{
    const ENTITY_TYPE: EntityType;

    /// Short label used in logs and CLI listings.
    fn display_name(&self) -> &str;

    /// Rejects field values that cannot be stored and read back.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// A locally stored entity together with its sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord<E> {
    pub local_id: String,
    pub server_id: Option<String>,
    pub fields: E,
    pub synced: bool,
    pub last_modified: DateTime<Utc>,
    /// Update timestamp last reported by the server
    pub server_updated_at: Option<DateTime<Utc>>,
    pub last_sync_attempt: Option<DateTime<Utc>>,
    pub sync_retry_count: i64,
    pub sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl<E: Entity> EntityRecord<E> {
    /// A never-synced record with a fresh local id.
    pub fn new(fields: E) -> Self {
        let now = Utc::now();
        Self {
            local_id: Uuid::new_v4().to_string(),
            server_id: None,
            fields,
            synced: false,
            last_modified: now,
            server_updated_at: None,
            last_sync_attempt: None,
            sync_retry_count: 0,
            sync_error: None,
            created_at: now,
        }
    }

    /// A record discovered on the server during a pull.
    pub fn from_server(server_id: impl Into<String>, fields: E, updated_at: DateTime<Utc>) -> Self {
        Self {
            local_id: Uuid::new_v4().to_string(),
            server_id: Some(server_id.into()),
            fields,
            synced: true,
            last_modified: updated_at,
            server_updated_at: Some(updated_at),
            last_sync_attempt: None,
            sync_retry_count: 0,
            sync_error: None,
            created_at: Utc::now(),
        }
    }

    pub fn entity_type(&self) -> EntityType {
        E::ENTITY_TYPE
    }

    /// True until the server has acknowledged the record once.
    pub fn is_new(&self) -> bool {
        self.server_id.is_none()
    }
}

/// Returns a modification timestamp strictly later than `previous`.
///
/// Wall-clock time is used when it is ahead; otherwise the previous value is
/// advanced by one millisecond so `last_modified` never goes backwards.
pub fn next_modified(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + Duration::milliseconds(1)
    }
}

/// Who performed a local mutation. Forwarded to the server on deletes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub actor_id: Option<String>,
    pub actor_name: Option<String>,
}

impl ActorContext {
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: Some(actor_id.into()),
            actor_name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.actor_name = Some(name.into());
        self
    }
}

/// A pending server-side deletion of a record that is already gone locally.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletionQueueEntry {
    pub id: i64,
    pub entity_type: EntityType,
    pub server_id: String,
    pub entity_local_id: String,
    pub deleted_at: DateTime<Utc>,
    pub actor: ActorContext,
    pub last_sync_attempt: Option<DateTime<Utc>>,
    pub sync_retry_count: i64,
    pub sync_error: Option<String>,
}
