//! Server-sent-events realtime transport
//!
//! Each change feed is one long-lived SSE response whose events are named
//! `insert`, `update`, or `delete` and carry a JSON payload: the full
//! entity for inserts and updates, `{"id": ...}` for deletes. Unnamed
//! events and heartbeats are skipped. The snapshot is a plain GET.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::{Connection, PipelineEvent, PipelineJob};
use crate::rpc::RpcError;

use super::{Change, ChangeEvent, ChangeStream, RealtimeBackend, Snapshot, StreamError, StreamKind};

/// SSE-backed implementation of [`RealtimeBackend`].
pub struct SseRealtimeBackend {
    client: reqwest::Client,
    base: String,
    user_id: Uuid,
}

impl SseRealtimeBackend {
    /// Build a transport for the configured API base, scoped to one user.
    ///
    /// The client carries a connect timeout but no overall request timeout;
    /// a change feed is expected to stay open indefinitely.
    pub fn new(config: &AppConfig, user_id: Uuid) -> Result<Self, RpcError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.session_token {
            if let Ok(value) = HeaderValue::from_str(&format!("Bearer {token}")) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.rpc.timeout_seconds))
            .default_headers(headers)
            .build()
            .map_err(RpcError::Client)?;

        Ok(Self {
            client,
            base: config.api_base_url.as_str().trim_end_matches('/').to_string(),
            user_id,
        })
    }

    /// Test constructor pointing at an arbitrary base URL.
    pub fn with_base(base: &url::Url, user_id: Uuid) -> Result<Self, RpcError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(RpcError::Client)?;
        Ok(Self {
            client,
            base: base.as_str().trim_end_matches('/').to_string(),
            user_id,
        })
    }
}

#[async_trait]
impl RealtimeBackend for SseRealtimeBackend {
    async fn snapshot(&self) -> Result<Snapshot, RpcError> {
        const CALL: &str = "realtime-snapshot";
        let url = format!("{}/realtime/snapshot?userId={}", self.base, self.user_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| RpcError::Transport { call: CALL, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Rejected {
                call: CALL,
                message: format!("HTTP {status}"),
            });
        }
        response
            .json()
            .await
            .map_err(|source| RpcError::Transport { call: CALL, source })
    }

    async fn subscribe(&self, stream: StreamKind) -> Result<ChangeStream, RpcError> {
        const CALL: &str = "realtime-subscribe";
        // The job-event feed is unscoped by user.
        let url = match stream {
            StreamKind::JobEvents => format!("{}/realtime/{}", self.base, stream.as_str()),
            _ => format!(
                "{}/realtime/{}?userId={}",
                self.base,
                stream.as_str(),
                self.user_id
            ),
        };

        let response = self
            .client
            .get(&url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|source| RpcError::Transport { call: CALL, source })?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Rejected {
                call: CALL,
                message: format!("HTTP {status}"),
            });
        }

        let events = response.bytes_stream().eventsource().filter_map(move |item| {
            let mapped = match item {
                Ok(event) => decode_event(stream, &event.event, &event.data),
                Err(err) => Some(Err(StreamError::Transport(err.to_string()))),
            };
            async move { mapped }
        });

        Ok(Box::pin(events))
    }
}

#[derive(Deserialize)]
struct DeletePayload {
    id: Uuid,
}

/// Decode one SSE event into a change notification. Returns `None` for
/// heartbeats and unrecognized event names.
fn decode_event(
    stream: StreamKind,
    name: &str,
    data: &str,
) -> Option<Result<ChangeEvent, StreamError>> {
    fn entity_change<T: serde::de::DeserializeOwned>(
        name: &str,
        data: &str,
    ) -> Result<Change<T>, StreamError> {
        match name {
            "insert" => serde_json::from_str(data)
                .map(Change::Insert)
                .map_err(|e| StreamError::Decode(e.to_string())),
            "update" => serde_json::from_str(data)
                .map(Change::Update)
                .map_err(|e| StreamError::Decode(e.to_string())),
            "delete" => serde_json::from_str::<DeletePayload>(data)
                .map(|p| Change::Delete(p.id))
                .map_err(|e| StreamError::Decode(e.to_string())),
            other => Err(StreamError::Decode(format!("unknown event `{other}`"))),
        }
    }

    if !matches!(name, "insert" | "update" | "delete") {
        return None;
    }

    let change = match stream {
        StreamKind::Connections => entity_change::<Connection>(name, data).map(ChangeEvent::Connection),
        StreamKind::Jobs => entity_change::<PipelineJob>(name, data).map(ChangeEvent::Job),
        StreamKind::JobEvents => entity_change::<PipelineEvent>(name, data).map(ChangeEvent::JobEvent),
    };
    Some(change)
}
