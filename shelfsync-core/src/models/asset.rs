use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::entity_type::EntityType;

/// Where an asset's current content lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetOrigin {
    /// Captured on this device, bytes held locally
    Local,
    /// Known to the server, referenced by URL
    Server,
}

impl fmt::Display for AssetOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetOrigin::Local => write!(f, "local"),
            AssetOrigin::Server => write!(f, "server"),
        }
    }
}

impl FromStr for AssetOrigin {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(AssetOrigin::Local),
            "server" => Ok(AssetOrigin::Server),
            _ => Err(format!("Invalid asset origin '{}'", s)),
        }
    }
}

/// Asset content: either the raw upload or the server's reference to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetData {
    Blob {
        bytes: Vec<u8>,
        content_type: String,
        filename: String,
    },
    Remote {
        url: String,
    },
}

impl AssetData {
    pub fn url(&self) -> Option<&str> {
        match self {
            AssetData::Remote { url } => Some(url),
            AssetData::Blob { .. } => None,
        }
    }
}

/// A binary attachment owned by an entity record.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetRecord {
    pub local_id: String,
    pub entity_type: EntityType,
    pub entity_local_id: String,
    pub entity_server_id: Option<String>,
    /// Ordering within the owning entity
    pub position: i64,
    pub origin: AssetOrigin,
    pub data: AssetData,
    pub synced: bool,
    pub created_at: DateTime<Utc>,
}

impl AssetRecord {
    /// A freshly captured local upload.
    pub fn local(
        entity_type: EntityType,
        entity_local_id: impl Into<String>,
        position: i64,
        bytes: Vec<u8>,
        content_type: impl Into<String>,
        filename: impl Into<String>,
    ) -> Self {
        Self {
            local_id: Uuid::new_v4().to_string(),
            entity_type,
            entity_local_id: entity_local_id.into(),
            entity_server_id: None,
            position,
            origin: AssetOrigin::Local,
            data: AssetData::Blob {
                bytes,
                content_type: content_type.into(),
                filename: filename.into(),
            },
            synced: false,
            created_at: Utc::now(),
        }
    }

    /// A reference materialized from the server's asset list.
    pub fn remote(
        entity_type: EntityType,
        entity_local_id: impl Into<String>,
        entity_server_id: impl Into<String>,
        position: i64,
        url: impl Into<String>,
    ) -> Self {
        Self {
            local_id: Uuid::new_v4().to_string(),
            entity_type,
            entity_local_id: entity_local_id.into(),
            entity_server_id: Some(entity_server_id.into()),
            position,
            origin: AssetOrigin::Server,
            data: AssetData::Remote { url: url.into() },
            synced: true,
            created_at: Utc::now(),
        }
    }

    /// True for local captures the server has not received yet.
    pub fn needs_upload(&self) -> bool {
        self.origin == AssetOrigin::Local && !self.synced
    }
}
