//! # Realtime State Synchronization
//!
//! Keeps an in-memory, render-ready cache consistent with server-pushed
//! change notifications for three logical streams: connection changes, job
//! changes, and job-event inserts. The cache is the only mutable shared
//! state in the crate and is mutated exclusively through its merge entry
//! point.

pub mod cache;
pub mod sse;
pub mod synchronizer;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Connection, Connector, ConnectorTool, PipelineEvent, PipelineJob};
use crate::rpc::RpcError;

pub use cache::{CacheState, SyncedCache};
pub use sse::SseRealtimeBackend;
pub use synchronizer::Synchronizer;

/// The three server-side change feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Connection records for the current user
    Connections,
    /// Job records for the current user
    Jobs,
    /// Job-event inserts, unscoped; filtered downstream by job ownership
    JobEvents,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Connections => "connections",
            StreamKind::Jobs => "jobs",
            StreamKind::JobEvents => "job-events",
        }
    }
}

/// One change notification applied to an entity collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Change<T> {
    Insert(T),
    Update(T),
    Delete(Uuid),
}

/// A change notification tagged with the stream it arrived on.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Connection(Change<Connection>),
    Job(Change<PipelineJob>),
    JobEvent(Change<PipelineEvent>),
}

/// Full state fetched before incremental merge resumes.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(default)]
    pub connectors: Vec<Connector>,
    #[serde(default)]
    pub tools: Vec<ConnectorTool>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub jobs: Vec<PipelineJob>,
    #[serde(default)]
    pub events: Vec<PipelineEvent>,
}

/// Failures surfaced by an individual change feed.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("change feed transport error: {0}")]
    Transport(String),
    #[error("undecodable change notification: {0}")]
    Decode(String),
}

/// A live change feed; ends (or errors) on transient disconnect.
pub type ChangeStream = BoxStream<'static, Result<ChangeEvent, StreamError>>;

/// Server-push transport the synchronizer runs against.
#[async_trait]
pub trait RealtimeBackend: Send + Sync {
    /// Fetch full snapshots for all streams plus the connector catalog.
    async fn snapshot(&self) -> Result<Snapshot, RpcError>;

    /// Open one of the three change feeds.
    async fn subscribe(&self, stream: StreamKind) -> Result<ChangeStream, RpcError>;
}
