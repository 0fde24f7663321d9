//! # Connection Repository
//!
//! Façade over connect/disconnect/list/get for the UI layer. Reads come
//! from the synchronized cache; writes go through the remote layer and are
//! reflected back by the realtime synchronizer (disconnect additionally
//! applies an optimistic local update once the remote call has succeeded).

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::flow::{FlowError, OAuthFlowController, StartedFlow};
use crate::models::{AuthType, Connection, Connector, ConnectorTool};
use crate::realtime::SyncedCache;
use crate::rpc::{LifecycleRpc, RpcError};

/// A connector joined with its connection (if any) and its tool catalog.
#[derive(Debug, Clone)]
pub struct ConnectorDetail {
    pub connector: Connector,
    pub connection: Option<Connection>,
    pub tools: Vec<ConnectorTool>,
}

/// What `connect` produced for a given connector.
#[derive(Debug)]
pub enum ConnectOutcome {
    /// OAuth connector: navigate to the authorization URL to continue
    Redirect(StartedFlow),
    /// Non-OAuth connector: the connection is active immediately
    Linked(Connection),
}

/// Repository-level failures.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// `connect` was asked for a connector that is not in the catalog
    #[error("connector `{slug}` not found")]
    UnknownConnector { slug: String },

    /// An api_key connector was connected without a secret
    #[error("connector `{slug}` requires an API key")]
    MissingSecret { slug: String },

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// CRUD and status-transition façade over the remote connection records.
pub struct ConnectionRepository {
    flow: Arc<OAuthFlowController>,
    rpc: Arc<dyn LifecycleRpc>,
    cache: SyncedCache,
}

impl ConnectionRepository {
    pub fn new(
        flow: Arc<OAuthFlowController>,
        rpc: Arc<dyn LifecycleRpc>,
        cache: SyncedCache,
    ) -> Self {
        Self { flow, rpc, cache }
    }

    /// Connect a connector by slug.
    ///
    /// OAuth connectors start the authorization flow and hand back the URL
    /// to navigate to. For api_key (and credential-free) connectors the
    /// remote layer upserts an active connection directly; the secret is
    /// passed through opaquely with no client-side validation.
    #[instrument(skip(self, secret))]
    pub async fn connect(
        &self,
        slug: &str,
        secret: Option<Zeroizing<String>>,
    ) -> Result<ConnectOutcome, RepositoryError> {
        let connector = {
            let state = self.cache.read().await;
            state.connector_by_slug(slug).cloned()
        }
        .ok_or_else(|| RepositoryError::UnknownConnector {
            slug: slug.to_string(),
        })?;

        match connector.auth_type {
            AuthType::Oauth => {
                let started = self.flow.start(connector.id).await?;
                Ok(ConnectOutcome::Redirect(started))
            }
            AuthType::ApiKey => {
                let secret = secret.ok_or_else(|| RepositoryError::MissingSecret {
                    slug: slug.to_string(),
                })?;
                let connection = self
                    .rpc
                    .upsert_connection(connector.id, Some(&secret))
                    .await?;
                info!(slug, connection_id = %connection.id, "api key connection established");
                Ok(ConnectOutcome::Linked(connection))
            }
            AuthType::None => {
                let connection = self.rpc.upsert_connection(connector.id, None).await?;
                info!(slug, connection_id = %connection.id, "credential-free connection established");
                Ok(ConnectOutcome::Linked(connection))
            }
        }
    }

    /// Revoke a connection. The record is retained server-side for audit;
    /// the local cache is updated optimistically once the remote call has
    /// succeeded.
    #[instrument(skip(self))]
    pub async fn disconnect(&self, connection_id: Uuid) -> Result<(), RepositoryError> {
        let revoked = self.flow.disconnect(connection_id).await?;
        self.cache.apply_local_connection(revoked).await;
        Ok(())
    }

    /// Ask the remote layer to refresh a connection's credentials; the
    /// synchronizer picks up the resulting change.
    #[instrument(skip(self))]
    pub async fn refresh(&self, connection_id: Uuid, force: bool) -> Result<(), RepositoryError> {
        self.flow.refresh_token(connection_id, force).await?;
        Ok(())
    }

    /// The current user's connections, newest first.
    pub async fn list_for_user(&self) -> Vec<Connection> {
        self.cache.read().await.connections.clone()
    }

    /// Join a connector with its open connection and tool catalog.
    ///
    /// `None` for an unknown slug is a normal outcome, not a fault; callers
    /// must handle the absent case.
    pub async fn get(&self, slug: &str) -> Option<ConnectorDetail> {
        let state = self.cache.read().await;
        let connector = state.connector_by_slug(slug)?.clone();
        let connection = state
            .connection_for(connector.id)
            .filter(|c| c.is_open())
            .cloned();
        let tools = state
            .tools_by_connector
            .get(&connector.id)
            .cloned()
            .unwrap_or_default();
        Some(ConnectorDetail {
            connector,
            connection,
            tools,
        })
    }
}
