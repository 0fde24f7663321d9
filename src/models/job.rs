//! Pipeline job and event models
//!
//! Execution records for a single tool invocation and its append-only log
//! lines. Their execution logic lives in the remote layer; these types are
//! the payloads flowing through the realtime synchronizer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Execution status of a pipeline job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

/// One tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineJob {
    /// Unique identifier for the job (primary key)
    pub id: Uuid,

    /// Owning user
    pub user_id: Uuid,

    /// Connection the tool ran against
    pub connection_id: Uuid,

    /// Name of the invoked tool
    pub tool: String,

    /// Execution status
    pub status: JobStatus,

    /// When the job was created
    pub created_at: DateTime<Utc>,

    /// When the job record was last updated
    pub updated_at: DateTime<Utc>,
}

/// One append-only log line belonging to a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineEvent {
    /// Unique identifier for the event (primary key)
    pub id: Uuid,

    /// Job this event belongs to
    pub job_id: Uuid,

    /// Log level reported by the executor (e.g. "info", "error")
    pub level: String,

    /// Log line text
    pub message: String,

    /// When the executor emitted the line
    pub created_at: DateTime<Utc>,
}

impl JobStatus {
    /// Whether the job has reached a terminal state
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}
