//! Append-only audit trail of job transitions.

use serde::Serialize;

use forma_core::error_category::ErrorCategory;
use forma_core::stages::{JobStatus, Stage, TransitionKind};
use forma_core::types::{DbId, Timestamp};

/// A row from the `job_log` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub id: DbId,
    pub job_id: DbId,
    pub batch_id: DbId,
    pub kind: TransitionKind,
    pub from_stage: Stage,
    pub from_status: JobStatus,
    pub to_stage: Stage,
    pub to_status: JobStatus,
    pub actor: String,
    pub message: Option<String>,
    pub error_category: Option<ErrorCategory>,
    pub created_at: Timestamp,
}

/// Input for appending a log entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogEntry {
    pub job_id: DbId,
    pub batch_id: DbId,
    pub kind: TransitionKind,
    pub from_stage: Stage,
    pub from_status: JobStatus,
    pub to_stage: Stage,
    pub to_status: JobStatus,
    pub actor: String,
    pub message: Option<String>,
    pub error_category: Option<ErrorCategory>,
}
