//! In-memory synchronized cache
//!
//! An explicit store object with a defined mutation API and a revision
//! channel for consumers. No ambient singleton: the cache is constructed
//! once and passed by reference to whatever needs it. All mutation goes
//! through [`SyncedCache::apply`] and [`SyncedCache::load_snapshot`].
//!
//! Merge rules, uniform across all three streams:
//! - insert: idempotent; a duplicate id replaces rather than duplicates
//! - update: replaces the matching entry; unknown ids are dropped silently
//! - delete: removes the matching entry; unknown ids are a no-op
//! - within one id, last write wins by arrival order

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use metrics::counter;
use tokio::sync::{RwLock, RwLockReadGuard, watch};
use tracing::debug;
use uuid::Uuid;

use crate::config::RealtimeConfig;
use crate::models::{Connection, Connector, ConnectorTool, PipelineEvent, PipelineJob};

use super::{Change, ChangeEvent, Snapshot};

/// Render-ready view of server-side state.
pub struct CacheState {
    /// Connector catalog, as of the last snapshot
    pub connectors: Vec<Connector>,
    /// Tool catalog grouped by connector
    pub tools_by_connector: HashMap<Uuid, Vec<ConnectorTool>>,
    /// The user's connections, newest first
    pub connections: Vec<Connection>,
    /// The user's jobs, newest first
    pub jobs: Vec<PipelineJob>,
    /// Append-only event logs per job, bounded to the most recent jobs
    events_by_job: LruCache<Uuid, Vec<PipelineEvent>>,
    /// Rolling activity log across all jobs
    pub logs: VecDeque<PipelineEvent>,
    log_capacity: usize,
}

impl CacheState {
    fn new(config: &RealtimeConfig) -> Self {
        let events_capacity =
            NonZeroUsize::new(config.events_job_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            connectors: Vec::new(),
            tools_by_connector: HashMap::new(),
            connections: Vec::new(),
            jobs: Vec::new(),
            events_by_job: LruCache::new(events_capacity),
            logs: VecDeque::new(),
            log_capacity: config.log_capacity.max(1),
        }
    }

    /// Event log for one job, empty when the job is unknown.
    pub fn events(&self, job_id: Uuid) -> &[PipelineEvent] {
        self.events_by_job
            .peek(&job_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The connection for a connector, if one exists.
    pub fn connection_for(&self, connector_id: Uuid) -> Option<&Connection> {
        self.connections
            .iter()
            .find(|c| c.connector_id == connector_id)
    }

    /// Connector catalog entry by slug.
    pub fn connector_by_slug(&self, slug: &str) -> Option<&Connector> {
        self.connectors.iter().find(|c| c.slug == slug)
    }

    fn push_log(&mut self, event: PipelineEvent) {
        if self.logs.len() >= self.log_capacity {
            self.logs.pop_front();
        }
        self.logs.push_back(event);
    }
}

/// Shared handle to the synchronized cache.
#[derive(Clone)]
pub struct SyncedCache {
    inner: Arc<RwLock<CacheState>>,
    revision: Arc<watch::Sender<u64>>,
}

impl SyncedCache {
    pub fn new(config: &RealtimeConfig) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(CacheState::new(config))),
            revision: Arc::new(revision),
        }
    }

    /// Read access to the current state.
    pub async fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.inner.read().await
    }

    /// Revision channel; the value bumps on every applied mutation.
    pub fn watch_revision(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Replace the whole cache from a freshly fetched snapshot.
    pub async fn load_snapshot(&self, snapshot: Snapshot) {
        let mut state = self.inner.write().await;

        state.connectors = snapshot.connectors;
        state.tools_by_connector.clear();
        for tool in snapshot.tools {
            state
                .tools_by_connector
                .entry(tool.connector_id)
                .or_default()
                .push(tool);
        }
        state.connections = snapshot.connections;
        state.jobs = snapshot.jobs;
        state.events_by_job.clear();
        state.logs.clear();
        for event in snapshot.events {
            merge_job_event(&mut state, Change::Insert(event));
        }

        drop(state);
        self.bump();
    }

    /// Merge one change notification. The single mutation entry point for
    /// all three streams.
    pub async fn apply(&self, change: ChangeEvent) {
        let mut state = self.inner.write().await;
        match change {
            ChangeEvent::Connection(change) => {
                merge_keyed(&mut state.connections, change, |c| c.id, "connections");
            }
            ChangeEvent::Job(change) => {
                merge_keyed(&mut state.jobs, change, |j| j.id, "jobs");
            }
            ChangeEvent::JobEvent(change) => {
                merge_job_event(&mut state, change);
            }
        }
        drop(state);
        self.bump();
    }

    /// Apply a locally observed connection update ahead of the server push,
    /// e.g. a disconnect reflected optimistically.
    pub async fn apply_local_connection(&self, connection: Connection) {
        self.apply(ChangeEvent::Connection(Change::Update(connection)))
            .await;
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
        counter!("realtime_changes_applied_total").increment(1);
    }
}

/// Shared merge for the flat, newest-first collections.
fn merge_keyed<T>(entries: &mut Vec<T>, change: Change<T>, key: fn(&T) -> Uuid, stream: &'static str) {
    match change {
        Change::Insert(entity) => {
            let id = key(&entity);
            if let Some(existing) = entries.iter_mut().find(|e| key(e) == id) {
                // Duplicate insert: replace, never duplicate.
                *existing = entity;
            } else {
                entries.insert(0, entity);
            }
        }
        Change::Update(entity) => {
            let id = key(&entity);
            if let Some(existing) = entries.iter_mut().find(|e| key(e) == id) {
                *existing = entity;
            } else {
                // Entity predates this session's subscription; do not
                // fabricate a partial entry.
                debug!(stream, %id, "dropping update for unknown id");
                counter!("realtime_unknown_update_dropped_total").increment(1);
            }
        }
        Change::Delete(id) => {
            entries.retain(|e| key(e) != id);
        }
    }
}

fn merge_job_event(state: &mut CacheState, change: Change<PipelineEvent>) {
    match change {
        Change::Insert(event) => {
            // The job-event feed is unscoped by user; only events for jobs
            // we know about belong in this cache.
            if !state.jobs.iter().any(|j| j.id == event.job_id) {
                debug!(job_id = %event.job_id, "dropping event for unowned job");
                return;
            }
            let fresh = {
                let log = state
                    .events_by_job
                    .get_or_insert_mut(event.job_id, Vec::new);
                if let Some(existing) = log.iter_mut().find(|e| e.id == event.id) {
                    *existing = event.clone();
                    false
                } else {
                    log.push(event.clone());
                    true
                }
            };
            if fresh {
                state.push_log(event);
            }
        }
        Change::Update(event) => {
            let Some(log) = state.events_by_job.get_mut(&event.job_id) else {
                debug!(job_id = %event.job_id, "dropping event update for unknown job");
                counter!("realtime_unknown_update_dropped_total").increment(1);
                return;
            };
            if let Some(existing) = log.iter_mut().find(|e| e.id == event.id) {
                *existing = event;
            } else {
                counter!("realtime_unknown_update_dropped_total").increment(1);
            }
        }
        Change::Delete(id) => {
            // Event deletes carry no job id; scan the retained logs.
            for (_, log) in state.events_by_job.iter_mut() {
                log.retain(|e| e.id != id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConnectionStatus, JobStatus};
    use chrono::Utc;

    fn cache() -> SyncedCache {
        SyncedCache::new(&RealtimeConfig::default())
    }

    fn connection(id: Uuid, status: ConnectionStatus) -> Connection {
        let now = Utc::now();
        Connection {
            id,
            user_id: Uuid::new_v4(),
            connector_id: Uuid::new_v4(),
            status,
            secret_ref: None,
            granted_scopes: Vec::new(),
            expires_at: None,
            last_used_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn job(id: Uuid) -> PipelineJob {
        let now = Utc::now();
        PipelineJob {
            id,
            user_id: Uuid::new_v4(),
            connection_id: Uuid::new_v4(),
            tool: "list_issues".to_string(),
            status: JobStatus::Running,
            created_at: now,
            updated_at: now,
        }
    }

    fn event(id: Uuid, job_id: Uuid, message: &str) -> PipelineEvent {
        PipelineEvent {
            id,
            job_id,
            level: "info".to_string(),
            message: message.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_insert_replaces() {
        let cache = cache();
        let id = Uuid::new_v4();

        cache
            .apply(ChangeEvent::Connection(Change::Insert(connection(
                id,
                ConnectionStatus::Pending,
            ))))
            .await;
        cache
            .apply(ChangeEvent::Connection(Change::Insert(connection(
                id,
                ConnectionStatus::Active,
            ))))
            .await;

        let state = cache.read().await;
        assert_eq!(state.connections.len(), 1);
        assert_eq!(state.connections[0].status, ConnectionStatus::Active);
    }

    #[tokio::test]
    async fn unknown_update_is_dropped() {
        let cache = cache();
        cache
            .apply(ChangeEvent::Connection(Change::Update(connection(
                Uuid::new_v4(),
                ConnectionStatus::Active,
            ))))
            .await;
        assert!(cache.read().await.connections.is_empty());
    }

    #[tokio::test]
    async fn unknown_delete_is_noop() {
        let cache = cache();
        let id = Uuid::new_v4();
        cache
            .apply(ChangeEvent::Connection(Change::Insert(connection(
                id,
                ConnectionStatus::Active,
            ))))
            .await;
        cache
            .apply(ChangeEvent::Connection(Change::Delete(Uuid::new_v4())))
            .await;
        assert_eq!(cache.read().await.connections.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_event_insert_is_idempotent() {
        let cache = cache();
        let job_id = Uuid::new_v4();
        let event_id = Uuid::new_v4();

        cache.apply(ChangeEvent::Job(Change::Insert(job(job_id)))).await;
        cache
            .apply(ChangeEvent::JobEvent(Change::Insert(event(
                event_id, job_id, "first",
            ))))
            .await;
        cache
            .apply(ChangeEvent::JobEvent(Change::Insert(event(
                event_id, job_id, "second",
            ))))
            .await;

        let state = cache.read().await;
        assert_eq!(state.events(job_id).len(), 1);
        assert_eq!(state.events(job_id)[0].message, "second");
    }

    #[tokio::test]
    async fn events_for_unowned_jobs_are_filtered() {
        let cache = cache();
        cache
            .apply(ChangeEvent::JobEvent(Change::Insert(event(
                Uuid::new_v4(),
                Uuid::new_v4(),
                "not ours",
            ))))
            .await;
        assert!(cache.read().await.logs.is_empty());
    }

    #[tokio::test]
    async fn inserts_prepend_newest_first() {
        let cache = cache();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        cache.apply(ChangeEvent::Job(Change::Insert(job(first)))).await;
        cache.apply(ChangeEvent::Job(Change::Insert(job(second)))).await;

        let state = cache.read().await;
        assert_eq!(state.jobs[0].id, second);
        assert_eq!(state.jobs[1].id, first);
    }

    #[tokio::test]
    async fn snapshot_replaces_state_and_bumps_revision() {
        let cache = cache();
        let mut revision = cache.watch_revision();
        assert_eq!(*revision.borrow(), 0);

        let job_record = job(Uuid::new_v4());
        let snapshot = Snapshot {
            jobs: vec![job_record.clone()],
            events: vec![event(Uuid::new_v4(), job_record.id, "line")],
            ..Snapshot::default()
        };
        cache.load_snapshot(snapshot).await;

        assert!(revision.has_changed().unwrap());
        let state = cache.read().await;
        assert_eq!(state.jobs.len(), 1);
        assert_eq!(state.events(job_record.id).len(), 1);
        assert_eq!(state.logs.len(), 1);
    }
}
