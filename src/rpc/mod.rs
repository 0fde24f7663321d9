//! # Remote RPC Contracts
//!
//! The serverless functions that perform token exchange, health probing,
//! and alert delivery are external collaborators; this module defines the
//! calls the core makes and the shapes it expects back, behind a trait so
//! tests can substitute the transport.

pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::models::{Connection, ConnectionStatus, HealthResult, HealthStatus, HealthSummary};

pub use http::HttpRpcClient;

/// Successful `start-authorization` response.
#[derive(Debug)]
pub struct StartedAuthorization {
    /// Fully formed provider authorization URL for user redirection
    pub authorization_url: Url,
    /// Anti-CSRF state nonce minted for this attempt
    pub state: String,
    /// PKCE verifier minted by the remote layer; absent when verifier
    /// generation is delegated to the client
    pub code_verifier: Option<Zeroizing<String>>,
}

/// `exchange-authorization` request body.
#[derive(Debug)]
pub struct ExchangeRequest {
    pub code: String,
    pub state: String,
    pub code_verifier: Zeroizing<String>,
}

/// Successful `exchange-authorization` response.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeOutcome {
    pub connector_id: Uuid,
    pub connector_name: String,
    pub scopes: Vec<String>,
}

/// Successful `health-probe` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthProbeReport {
    pub summary: HealthSummary,
    pub results: Vec<HealthResult>,
}

/// One entry in a `dispatch-alert` batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthAlert {
    pub connector_name: String,
    pub connector_slug: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_email: Option<String>,
}

/// Per-alert delivery outcome reported by `dispatch-alert`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDeliveryResult {
    pub connector_slug: String,
    pub delivered: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// `dispatch-alert` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDispatchReport {
    pub sent: usize,
    #[serde(default)]
    pub results: Vec<AlertDeliveryResult>,
}

/// Remote-call failures, already shorn of transport internals.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("{call}: transport failure: {source}")]
    Transport {
        call: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{call}: rejected by remote layer: {message}")]
    Rejected { call: &'static str, message: String },

    #[error("{call}: unexpected response shape: {details}")]
    Malformed { call: &'static str, details: String },
}

impl RpcError {
    /// Whether the failure was a client-side timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcError::Transport { source, .. } if source.is_timeout())
    }
}

/// Remote calls the lifecycle core depends on.
///
/// All calls are scoped to the current user by the transport (bearer token
/// plus user id); the methods do not take a user parameter.
#[async_trait]
pub trait LifecycleRpc: Send + Sync {
    /// Mint an authorization URL, state nonce, and (usually) a verifier.
    async fn start_authorization(
        &self,
        connector_id: Uuid,
        redirect_uri: &Url,
    ) -> Result<StartedAuthorization, RpcError>;

    /// Redeem an authorization code. Never retried: the code is single-use.
    async fn exchange_authorization(
        &self,
        request: ExchangeRequest,
    ) -> Result<ExchangeOutcome, RpcError>;

    /// Ask the remote layer to refresh a connection's credentials.
    async fn refresh_token(&self, connection_id: Uuid, force: bool) -> Result<(), RpcError>;

    /// Transition a connection's status (e.g. to `revoked` on disconnect).
    async fn update_connection_status(
        &self,
        connection_id: Uuid,
        status: ConnectionStatus,
    ) -> Result<Connection, RpcError>;

    /// Upsert an active connection for a non-OAuth connector. The secret is
    /// handed through opaquely; no client-side validation is performed.
    async fn upsert_connection(
        &self,
        connector_id: Uuid,
        secret: Option<&str>,
    ) -> Result<Connection, RpcError>;

    /// Batched reachability probe across the current user's connectors.
    async fn probe_health(&self) -> Result<HealthProbeReport, RpcError>;

    /// Deliver a batch of alerts in one call. Never retried.
    async fn dispatch_alerts(&self, batch: &[HealthAlert])
    -> Result<AlertDispatchReport, RpcError>;
}
