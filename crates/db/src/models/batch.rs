//! Batch entity, ingestion row DTO and derived status counts.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use forma_core::stages::JobStatus;
use forma_core::types::{DbId, Timestamp};

/// A row from the `batches` table.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct Batch {
    pub id: DbId,
    /// Number of rows the upload contained; one job per row.
    pub row_count: i32,
    pub uploaded_by: String,
    pub archived_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Batch {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}

/// One already-parsed ingestion row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Validate)]
pub struct NewJobRow {
    #[validate(length(min = 1, max = 1024, message = "source_path must be 1-1024 characters"))]
    pub source_path: String,
    #[validate(length(min = 1, max = 1024, message = "template_path must be 1-1024 characters"))]
    pub template_path: String,
    #[validate(length(min = 1, max = 255, message = "output_name must be 1-255 characters"))]
    pub output_name: String,
    #[validate(range(min = 0, max = 100, message = "priority must be between 0 and 100"))]
    #[serde(default)]
    pub priority: i32,
}

/// Job counts per status within a batch. Derived, never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub total: i64,
    pub queued: i64,
    pub processing: i64,
    pub awaiting_review: i64,
    pub completed: i64,
    pub error: i64,
}

impl StatusCounts {
    pub fn add(&mut self, status: JobStatus, n: i64) {
        self.total += n;
        match status {
            JobStatus::Queued => self.queued += n,
            JobStatus::Processing => self.processing += n,
            JobStatus::AwaitingReview => self.awaiting_review += n,
            JobStatus::Completed => self.completed += n,
            JobStatus::Error => self.error += n,
        }
    }
}

/// Batch with its derived counts, as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    #[serde(flatten)]
    pub batch: Batch,
    pub counts: StatusCounts,
}
