//! Connector catalog entry model
//!
//! A connector is a static catalog entry describing an integrable service.
//! Catalog administration owns these records; this subsystem only reads them.

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Authentication scheme a connector requires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// Authorization-code OAuth flow with PKCE
    Oauth,
    /// Opaque API key handed to the remote layer at connect time
    ApiKey,
    /// No credentials required
    None,
}

/// OAuth endpoint triple for connectors with `AuthType::Oauth`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthEndpoints {
    /// Provider authorization page the user is redirected to
    pub authorize_url: Url,
    /// Token endpoint used by the remote exchange function
    pub token_url: Url,
    /// Optional revocation endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoke_url: Option<Url>,
}

/// Static catalog entry describing an integrable service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connector {
    /// Unique identifier for the connector (primary key)
    pub id: Uuid,

    /// URL-safe identifier (snake_case, e.g. "github")
    pub slug: String,

    /// Human-readable display name
    pub name: String,

    /// Authentication scheme required by this connector
    pub auth_type: AuthType,

    /// OAuth endpoints, present only when `auth_type` is `Oauth`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthEndpoints>,

    /// Scopes the connector declares up front
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,

    /// Remote tool-protocol endpoint, if the connector exposes tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_endpoint: Option<Url>,
}

/// A tool exposed by a connector's remote tool protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorTool {
    /// Unique identifier for the tool (primary key)
    pub id: Uuid,

    /// Connector that exposes this tool
    pub connector_id: Uuid,

    /// Tool name as advertised by the connector
    pub name: String,

    /// Human-readable description (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Connector {
    /// Whether connecting requires the full authorization-code flow
    pub fn requires_authorization(&self) -> bool {
        self.auth_type == AuthType::Oauth
    }
}
