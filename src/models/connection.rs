//! Connection entity model
//!
//! A connection is a user's authorized link to one connector. The record
//! holds opaque references to stored secrets, never secret material itself.
//! At most one non-revoked connection exists per (user, connector) pair;
//! the remote layer enforces this with upsert-on-conflict semantics keyed
//! on that pair. Disconnect sets `revoked` and retains the record for
//! audit; this subsystem never hard-deletes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// Token exchange has not completed yet
    Pending,
    /// Usable credentials are on file
    Active,
    /// Credentials lapsed and were not refreshed in time
    Expired,
    /// Disconnected by the user; retained for audit
    Revoked,
    /// The remote layer could not keep the link usable
    Error,
}

/// A user's authorized link to one connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Unique identifier for the connection (primary key)
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// Connector this connection links to
    pub connector_id: Uuid,

    /// Lifecycle status
    pub status: ConnectionStatus,

    /// Opaque reference to the stored secret, never the secret itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,

    /// Scopes actually granted by the provider
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub granted_scopes: Vec<String>,

    /// When the stored credentials lapse, if the provider reports it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Last time a tool invocation used this connection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,

    /// When the connection was created
    pub created_at: DateTime<Utc>,

    /// When the connection was last updated
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    /// Whether this connection still occupies the (user, connector) slot
    pub fn is_open(&self) -> bool {
        self.status != ConnectionStatus::Revoked
    }
}
