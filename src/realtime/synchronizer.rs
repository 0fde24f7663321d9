//! Realtime synchronizer task
//!
//! Owns the three change-feed subscriptions and drives every notification
//! through the cache's merge entry point. On any feed ending or erroring,
//! the task tears down all three, backs off, resubscribes, and re-fetches
//! full snapshots before resuming incremental merge so nothing emitted
//! during the gap is missed. `close()` cancels the task; no merges happen
//! after it returns.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::config::RealtimeConfig;

use super::{ChangeStream, RealtimeBackend, StreamKind, SyncedCache};

/// Handle to the running synchronizer.
pub struct Synchronizer {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl Synchronizer {
    /// Spawn the synchronizer against a backend and cache.
    pub fn spawn(
        backend: Arc<dyn RealtimeBackend>,
        cache: SyncedCache,
        config: RealtimeConfig,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let task_token = shutdown.clone();
        let handle = tokio::spawn(run_sync_loop(backend, cache, config, task_token));
        Self { shutdown, handle }
    }

    /// Unsubscribe and stop. Idempotent with respect to the task already
    /// having exited.
    pub async fn close(self) {
        self.shutdown.cancel();
        let _ = self.handle.await;
    }
}

#[instrument(skip_all)]
async fn run_sync_loop(
    backend: Arc<dyn RealtimeBackend>,
    cache: SyncedCache,
    config: RealtimeConfig,
    shutdown: CancellationToken,
) {
    let mut backoff_ms = config.reconnect_base_ms;
    let mut established_before = false;

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        // Subscribe first, then snapshot: changes emitted between the two
        // are re-delivered or captured by the snapshot, never lost.
        let session = establish(backend.as_ref()).await;
        let (connections, jobs, job_events) = match session {
            Ok(streams) => streams,
            Err(err) => {
                warn!(error = %err, backoff_ms, "realtime subscription failed");
                counter!("realtime_connect_failures_total").increment(1);
                if !wait_backoff(&shutdown, backoff_ms).await {
                    break;
                }
                backoff_ms = (backoff_ms * 2).min(config.reconnect_max_ms);
                continue;
            }
        };

        match backend.snapshot().await {
            Ok(snapshot) => cache.load_snapshot(snapshot).await,
            Err(err) => {
                warn!(error = %err, backoff_ms, "snapshot fetch failed");
                counter!("realtime_connect_failures_total").increment(1);
                if !wait_backoff(&shutdown, backoff_ms).await {
                    break;
                }
                backoff_ms = (backoff_ms * 2).min(config.reconnect_max_ms);
                continue;
            }
        }

        backoff_ms = config.reconnect_base_ms;
        if established_before {
            counter!("realtime_reconnects_total").increment(1);
        }
        established_before = true;
        info!("realtime streams established");

        merge_until_disconnect(&cache, &shutdown, connections, jobs, job_events).await;
        if shutdown.is_cancelled() {
            break;
        }
        warn!("realtime stream interrupted, resubscribing");
    }

    info!("realtime synchronizer stopped");
}

async fn establish(
    backend: &dyn RealtimeBackend,
) -> Result<(ChangeStream, ChangeStream, ChangeStream), crate::rpc::RpcError> {
    let connections = backend.subscribe(StreamKind::Connections).await?;
    let jobs = backend.subscribe(StreamKind::Jobs).await?;
    let job_events = backend.subscribe(StreamKind::JobEvents).await?;
    Ok((connections, jobs, job_events))
}

/// Drain the three feeds until one of them ends, errors, or shutdown fires.
/// No cross-stream ordering is assumed; each notification is merged as it
/// arrives.
async fn merge_until_disconnect(
    cache: &SyncedCache,
    shutdown: &CancellationToken,
    mut connections: ChangeStream,
    mut jobs: ChangeStream,
    mut job_events: ChangeStream,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            item = connections.next() => {
                match item {
                    Some(Ok(change)) => cache.apply(change).await,
                    Some(Err(err)) => {
                        warn!(stream = "connections", error = %err, "feed error");
                        return;
                    }
                    None => return,
                }
            }
            item = jobs.next() => {
                match item {
                    Some(Ok(change)) => cache.apply(change).await,
                    Some(Err(err)) => {
                        warn!(stream = "jobs", error = %err, "feed error");
                        return;
                    }
                    None => return,
                }
            }
            item = job_events.next() => {
                match item {
                    Some(Ok(change)) => cache.apply(change).await,
                    Some(Err(err)) => {
                        warn!(stream = "job-events", error = %err, "feed error");
                        return;
                    }
                    None => return,
                }
            }
        }
    }
}

/// Sleep for the backoff window unless shutdown fires first. Returns false
/// when the loop should exit.
async fn wait_backoff(shutdown: &CancellationToken, backoff_ms: u64) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = sleep(Duration::from_millis(backoff_ms)) => true,
    }
}
