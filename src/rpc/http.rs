//! HTTP implementation of the remote RPC contracts.
//!
//! One reqwest client with a per-request timeout and the user's bearer
//! token as a default header. Idempotent calls retry with exponential
//! backoff and jitter; the authorization-code exchange and alert dispatch
//! are single-shot.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::{AppConfig, RpcConfig};
use crate::models::{Connection, ConnectionStatus};

use super::{
    AlertDispatchReport, ExchangeOutcome, ExchangeRequest, HealthAlert, HealthProbeReport,
    LifecycleRpc, RpcError, StartedAuthorization,
};

/// HTTP client for the remote lifecycle RPCs.
pub struct HttpRpcClient {
    client: reqwest::Client,
    base: String,
    user_id: Uuid,
    retry_max_attempts: u32,
    retry_base_ms: u64,
    retry_jitter_factor: f64,
}

impl HttpRpcClient {
    /// Build a client for the configured API base, scoped to one user.
    pub fn new(config: &AppConfig, user_id: Uuid) -> Result<Self, RpcError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.session_token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.rpc.timeout_seconds))
            .default_headers(headers)
            .build()
            .map_err(RpcError::Client)?;

        Ok(Self {
            client,
            base: config.api_base_url.as_str().trim_end_matches('/').to_string(),
            user_id,
            retry_max_attempts: config.rpc.retry_max_attempts,
            retry_base_ms: config.rpc.retry_base_ms,
            retry_jitter_factor: config.rpc.retry_jitter_factor,
        })
    }

    /// Variant used by tests to point at an arbitrary base URL.
    pub fn with_base(base: &Url, rpc: &RpcConfig, user_id: Uuid) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(rpc.timeout_seconds))
            .build()
            .map_err(RpcError::Client)?;
        Ok(Self {
            client,
            base: base.as_str().trim_end_matches('/').to_string(),
            user_id,
            retry_max_attempts: rpc.retry_max_attempts,
            retry_base_ms: rpc.retry_base_ms,
            retry_jitter_factor: rpc.retry_jitter_factor,
        })
    }

    async fn post_rpc<T: serde::de::DeserializeOwned>(
        &self,
        call: &'static str,
        body: serde_json::Value,
        idempotent: bool,
    ) -> Result<T, RpcError> {
        let url = format!("{}/rpc/{}", self.base, call);
        let max_attempts = if idempotent { self.retry_max_attempts } else { 1 };
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome = self.client.post(&url).json(&body).send().await;

            match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() && attempt < max_attempts {
                        warn!(call, %status, attempt, "remote call failed, retrying");
                        tokio::time::sleep(self.backoff_delay(attempt)).await;
                        continue;
                    }
                    if !status.is_success() {
                        return Err(RpcError::Rejected {
                            call,
                            message: format!("HTTP {status}"),
                        });
                    }
                    let payload = response.text().await.map_err(|source| RpcError::Transport {
                        call,
                        source,
                    })?;
                    return serde_json::from_str(&payload).map_err(|err| RpcError::Malformed {
                        call,
                        details: err.to_string(),
                    });
                }
                Err(err) => {
                    let retryable = err.is_timeout() || err.is_connect();
                    if retryable && attempt < max_attempts {
                        warn!(call, error = %err, attempt, "transport failure, retrying");
                        tokio::time::sleep(self.backoff_delay(attempt)).await;
                        continue;
                    }
                    return Err(RpcError::Transport { call, source: err });
                }
            }
        }
    }

    /// Exponential backoff with jitter: base * 2^(attempt-1), * (1 ± jitter).
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry_base_ms.saturating_mul(1u64 << (attempt - 1).min(16));
        let factor = if self.retry_jitter_factor > 0.0 {
            1.0 + rand::thread_rng()
                .gen_range(-self.retry_jitter_factor..=self.retry_jitter_factor)
        } else {
            1.0
        };
        Duration::from_millis((base as f64 * factor).max(0.0) as u64)
    }
}

fn require<T>(call: &'static str, field: &'static str, value: Option<T>) -> Result<T, RpcError> {
    value.ok_or(RpcError::Malformed {
        call,
        details: format!("missing field `{field}`"),
    })
}

fn reject_on_failure(
    call: &'static str,
    success: bool,
    error: Option<String>,
) -> Result<(), RpcError> {
    if success {
        Ok(())
    } else {
        Err(RpcError::Rejected {
            call,
            message: error.unwrap_or_else(|| "unspecified remote error".to_string()),
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartAuthorizationWire {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    authorization_url: Option<Url>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    code_verifier: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeWire {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    connector_id: Option<Uuid>,
    #[serde(default)]
    connector_name: Option<String>,
    #[serde(default)]
    scopes: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct AckWire {
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectionWire {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    connection: Option<Connection>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HealthProbeWire {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    report: Option<HealthProbeReport>,
}

#[async_trait]
impl LifecycleRpc for HttpRpcClient {
    async fn start_authorization(
        &self,
        connector_id: Uuid,
        redirect_uri: &Url,
    ) -> Result<StartedAuthorization, RpcError> {
        const CALL: &str = "start-authorization";
        let body = json!({
            "connectorId": connector_id,
            "userId": self.user_id,
            "redirectUri": redirect_uri,
        });
        let wire: StartAuthorizationWire = self.post_rpc(CALL, body, true).await?;
        reject_on_failure(CALL, wire.success, wire.error)?;

        Ok(StartedAuthorization {
            authorization_url: require(CALL, "authorizationUrl", wire.authorization_url)?,
            state: require(CALL, "state", wire.state)?,
            code_verifier: wire.code_verifier.map(Zeroizing::new),
        })
    }

    async fn exchange_authorization(
        &self,
        request: ExchangeRequest,
    ) -> Result<ExchangeOutcome, RpcError> {
        const CALL: &str = "exchange-authorization";
        let body = json!({
            "code": request.code,
            "state": request.state,
            "codeVerifier": &*request.code_verifier,
        });
        // The authorization code is single-use; never retried.
        let wire: ExchangeWire = self.post_rpc(CALL, body, false).await?;
        reject_on_failure(CALL, wire.success, wire.error)?;

        Ok(ExchangeOutcome {
            connector_id: require(CALL, "connectorId", wire.connector_id)?,
            connector_name: require(CALL, "connectorName", wire.connector_name)?,
            scopes: wire.scopes.unwrap_or_default(),
        })
    }

    async fn refresh_token(&self, connection_id: Uuid, force: bool) -> Result<(), RpcError> {
        const CALL: &str = "refresh-token";
        let body = json!({ "connectionId": connection_id, "force": force });
        let wire: AckWire = self.post_rpc(CALL, body, true).await?;
        reject_on_failure(CALL, wire.success, wire.error)
    }

    async fn update_connection_status(
        &self,
        connection_id: Uuid,
        status: ConnectionStatus,
    ) -> Result<Connection, RpcError> {
        const CALL: &str = "connection-status";
        let body = json!({ "connectionId": connection_id, "status": status });
        let wire: ConnectionWire = self.post_rpc(CALL, body, true).await?;
        reject_on_failure(CALL, wire.success, wire.error)?;
        require(CALL, "connection", wire.connection)
    }

    async fn upsert_connection(
        &self,
        connector_id: Uuid,
        secret: Option<&str>,
    ) -> Result<Connection, RpcError> {
        const CALL: &str = "upsert-connection";
        let body = json!({
            "connectorId": connector_id,
            "userId": self.user_id,
            "secret": secret,
        });
        let wire: ConnectionWire = self.post_rpc(CALL, body, true).await?;
        reject_on_failure(CALL, wire.success, wire.error)?;
        require(CALL, "connection", wire.connection)
    }

    async fn probe_health(&self) -> Result<HealthProbeReport, RpcError> {
        const CALL: &str = "health-probe";
        let wire: HealthProbeWire = self.post_rpc(CALL, json!({}), true).await?;
        reject_on_failure(CALL, wire.success, wire.error)?;
        require(CALL, "results", wire.report)
    }

    async fn dispatch_alerts(
        &self,
        batch: &[HealthAlert],
    ) -> Result<AlertDispatchReport, RpcError> {
        const CALL: &str = "dispatch-alert";
        let body = serde_json::to_value(batch).map_err(|err| RpcError::Malformed {
            call: CALL,
            details: err.to_string(),
        })?;
        debug!(alerts = batch.len(), "dispatching alert batch");
        // Failures are reported to the caller, never retried here.
        self.post_rpc(CALL, body, false).await
    }
}
