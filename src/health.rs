//! # Health Monitor
//!
//! Periodically invokes the batched health-probe RPC, keeps the latest
//! results in memory, and detects status transitions. Only degradations
//! notify: healthy→degraded, healthy→unhealthy, or degraded→unhealthy.
//! Lateral, improving, or repeated statuses stay quiet, which keeps a
//! flapping connector from producing an alert storm.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use tokio::sync::{Mutex, RwLock};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::HealthMonitorConfig;
use crate::models::{HealthResult, HealthStatus};
use crate::notify::NotificationDispatcher;
use crate::rpc::LifecycleRpc;

/// Whether moving from `previous` to `next` is a notification-worthy
/// degradation. The first observation for a connector has no previous
/// value and is never a transition.
pub fn is_degradation(previous: HealthStatus, next: HealthStatus) -> bool {
    matches!(
        (previous, next),
        (
            HealthStatus::Healthy,
            HealthStatus::Degraded | HealthStatus::Unhealthy
        ) | (HealthStatus::Degraded, HealthStatus::Unhealthy)
    )
}

/// Fixed-interval connector health poller.
pub struct HealthMonitor {
    rpc: Arc<dyn LifecycleRpc>,
    dispatcher: Arc<NotificationDispatcher>,
    poll_interval: Duration,
    previous: Mutex<HashMap<Uuid, HealthStatus>>,
    latest: RwLock<Vec<HealthResult>>,
}

impl HealthMonitor {
    pub fn new(
        rpc: Arc<dyn LifecycleRpc>,
        dispatcher: Arc<NotificationDispatcher>,
        config: &HealthMonitorConfig,
    ) -> Self {
        Self {
            rpc,
            dispatcher,
            poll_interval: Duration::from_secs(config.interval_seconds),
            previous: Mutex::new(HashMap::new()),
            latest: RwLock::new(Vec::new()),
        }
    }

    /// Poll until the shutdown token fires. The interval's first tick
    /// completes immediately, so the eager probe on mount and the periodic
    /// probes share one code path.
    #[instrument(skip_all)]
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(interval_seconds = self.poll_interval.as_secs(), "starting health monitor");
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("health monitor shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("health monitor stopped");
    }

    /// Execute one probe cycle.
    #[instrument(skip_all)]
    pub async fn tick(&self) {
        let started = std::time::Instant::now();

        let report = match self.rpc.probe_health().await {
            Ok(report) => report,
            Err(err) => {
                // Keep the previous result set; one missed poll must not
                // flip the whole board to unknown.
                warn!(error = %err, "health probe failed, retaining previous results");
                counter!("health_probe_failures_total").increment(1);
                return;
            }
        };

        histogram!("health_probe_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);
        gauge!("connector_health_healthy").set(report.summary.healthy as f64);
        gauge!("connector_health_degraded").set(report.summary.degraded as f64);
        gauge!("connector_health_unhealthy").set(report.summary.unhealthy as f64);

        let degradations = self.detect_degradations(&report.results).await;
        *self.latest.write().await = report.results;

        if degradations.is_empty() {
            return;
        }
        counter!("health_degradations_total").increment(degradations.len() as u64);
        for result in &degradations {
            debug!(
                connector = %result.connector_slug,
                status = ?result.status,
                "connector health degraded"
            );
        }

        let outcome = self.dispatcher.send_health_alerts(&degradations).await;
        if outcome.failed > 0 {
            warn!(failed = outcome.failed, "health alert delivery incomplete");
        }
        self.dispatcher.notify_desktop(&degradations);
    }

    /// Compare against the previous cycle and collect degradations, then
    /// remember the new statuses.
    async fn detect_degradations(&self, results: &[HealthResult]) -> Vec<HealthResult> {
        let mut previous = self.previous.lock().await;
        let mut degradations = Vec::new();
        for result in results {
            if let Some(&prior) = previous.get(&result.connector_id) {
                if is_degradation(prior, result.status) {
                    degradations.push(result.clone());
                }
            }
            previous.insert(result.connector_id, result.status);
        }
        degradations
    }

    /// Most recent successful probe results.
    pub async fn latest(&self) -> Vec<HealthResult> {
        self.latest.read().await.clone()
    }
}
