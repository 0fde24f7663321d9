//! # Notification Dispatcher
//!
//! Fans detected health degradations out to the remote alert-delivery RPC
//! and, when the user has opted in, to local desktop notifications. The
//! remote send is one batched call; an all-healthy input short-circuits
//! before any network traffic.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use metrics::counter;
use tracing::{error, info, instrument};

use crate::models::HealthResult;
use crate::prefs::{Preferences, PrefsError, PreferenceStore};
use crate::rpc::{HealthAlert, LifecycleRpc};

/// What happened to a dispatched batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AlertOutcome {
    /// Alerts the remote layer confirmed sending
    pub sent: usize,
    /// Alerts that did not go out
    pub failed: usize,
}

/// Local desktop notification surface.
///
/// Delivery mechanics are out of scope here; implementations may bridge to
/// an OS notification center or just log.
pub trait DesktopNotifier: Send + Sync {
    /// Ask the platform for permission. Called lazily on first opt-in.
    fn request_permission(&self) -> bool;

    /// Show a notification.
    fn notify(&self, title: &str, body: &str);
}

/// Default notifier: fire-and-log.
pub struct LogDesktopNotifier;

impl DesktopNotifier for LogDesktopNotifier {
    fn request_permission(&self) -> bool {
        info!("desktop notification permission granted");
        true
    }

    fn notify(&self, title: &str, body: &str) {
        info!(title, body, "desktop notification");
    }
}

/// Fan-out from health transitions to alert channels.
pub struct NotificationDispatcher {
    rpc: Arc<dyn LifecycleRpc>,
    prefs: PreferenceStore,
    desktop: Box<dyn DesktopNotifier>,
    desktop_opt_in: AtomicBool,
    recipient_email: Option<String>,
}

impl NotificationDispatcher {
    pub fn new(
        rpc: Arc<dyn LifecycleRpc>,
        prefs: PreferenceStore,
        desktop: Box<dyn DesktopNotifier>,
        recipient_email: Option<String>,
    ) -> Self {
        // The opt-in flag persists across sessions; permission was already
        // granted when it was first enabled.
        let opted_in = prefs.load().desktop_health_alerts;
        Self {
            rpc,
            prefs,
            desktop,
            desktop_opt_in: AtomicBool::new(opted_in),
            recipient_email,
        }
    }

    /// Deliver email alerts for the degraded and unhealthy entries of a
    /// result set, as one batched remote call.
    ///
    /// An input with nothing alertable returns `{sent: 0}` without touching
    /// the network. A failed dispatch is logged and reported back; it is
    /// never retried here.
    #[instrument(skip_all)]
    pub async fn send_health_alerts(&self, results: &[HealthResult]) -> AlertOutcome {
        let batch: Vec<HealthAlert> = results
            .iter()
            .filter(|result| result.status.is_alertable())
            .map(|result| self.to_alert(result))
            .collect();

        if batch.is_empty() {
            return AlertOutcome { sent: 0, failed: 0 };
        }

        match self.rpc.dispatch_alerts(&batch).await {
            Ok(report) => {
                counter!("health_alerts_sent_total").increment(report.sent as u64);
                AlertOutcome {
                    sent: report.sent,
                    failed: batch.len().saturating_sub(report.sent),
                }
            }
            Err(err) => {
                error!(error = %err, alerts = batch.len(), "alert dispatch failed");
                counter!("health_alert_dispatch_failures_total").increment(1);
                AlertOutcome {
                    sent: 0,
                    failed: batch.len(),
                }
            }
        }
    }

    /// Show desktop notifications for alertable results, when opted in.
    pub fn notify_desktop(&self, results: &[HealthResult]) {
        if !self.desktop_opt_in() {
            return;
        }
        for result in results.iter().filter(|r| r.status.is_alertable()) {
            self.desktop.notify(
                &format!("{} connector {:?}", result.connector_name, result.status),
                result.error.as_deref().unwrap_or("health check degraded"),
            );
        }
    }

    /// Current desktop opt-in state.
    pub fn desktop_opt_in(&self) -> bool {
        self.desktop_opt_in.load(Ordering::Relaxed)
    }

    /// Change the desktop opt-in, persisting it across sessions.
    ///
    /// Permission is requested lazily on the first opt-in; a denied request
    /// leaves the flag off. Returns the effective state.
    pub fn set_desktop_opt_in(&self, enabled: bool) -> Result<bool, PrefsError> {
        let effective = if enabled && !self.desktop_opt_in() {
            self.desktop.request_permission()
        } else {
            enabled
        };

        self.desktop_opt_in.store(effective, Ordering::Relaxed);
        self.prefs.save(&Preferences {
            desktop_health_alerts: effective,
        })?;
        Ok(effective)
    }

    fn to_alert(&self, result: &HealthResult) -> HealthAlert {
        HealthAlert {
            connector_name: result.connector_name.clone(),
            connector_slug: result.connector_slug.clone(),
            status: result.status,
            error: result.error.clone(),
            latency_ms: result.latency_ms,
            timestamp: result.checked_at,
            recipient_email: self.recipient_email.clone(),
        }
    }
}
