//! The job entity: one design source paired with one template.

use serde::Serialize;

use forma_core::payloads::{ErrorRecord, StageCompletions, StagePayloads};
use forma_core::stages::{JobStatus, Stage};
use forma_core::types::{DbId, Timestamp};

/// A job as the pipeline sees it, with typed payloads decoded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: DbId,
    pub batch_id: DbId,
    pub stage: Stage,
    pub status: JobStatus,
    pub priority: i32,
    pub source_path: String,
    pub template_path: String,
    pub output_name: String,
    pub completions: StageCompletions,
    pub payloads: StagePayloads,
    /// Generation was entered through an explicit validation override.
    pub stage_override: bool,
    pub last_error: Option<ErrorRecord>,
    pub retry_count: i32,
    pub last_retry_at: Option<Timestamp>,
    /// Incremented on every write; used for optimistic concurrency.
    pub version: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    pub fn is_in_error(&self) -> bool {
        self.status == JobStatus::Error
    }

    /// Queued work the runner can pick up.
    pub fn is_runnable(&self) -> bool {
        self.status == JobStatus::Queued && self.stage.is_automated()
    }
}
