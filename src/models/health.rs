//! Connector health models
//!
//! Derived, non-persisted results of the batched reachability probe. The
//! previous cycle's values live only in the health monitor's memory so it
//! can detect transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reachability status of one connector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    /// Probe could not determine a status
    Unknown,
}

impl HealthStatus {
    /// Whether this status warrants inclusion in an alert batch
    pub fn is_alertable(self) -> bool {
        matches!(self, HealthStatus::Degraded | HealthStatus::Unhealthy)
    }
}

/// Probe result for one connector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResult {
    /// Connector the probe targeted
    pub connector_id: Uuid,

    /// Connector slug, carried for alert payloads
    pub connector_slug: String,

    /// Connector display name, carried for alert payloads
    pub connector_name: String,

    /// Observed status
    pub status: HealthStatus,

    /// Round-trip latency in milliseconds, when the probe completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,

    /// Probe error description, when the probe failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// When the probe ran
    pub checked_at: DateTime<Utc>,
}

/// Aggregate counts across one probe cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alertable_statuses() {
        assert!(!HealthStatus::Healthy.is_alertable());
        assert!(HealthStatus::Degraded.is_alertable());
        assert!(HealthStatus::Unhealthy.is_alertable());
        assert!(!HealthStatus::Unknown.is_alertable());
    }
}
