//! The storage seam used by the pipeline.

use async_trait::async_trait;

use forma_core::stages::Stage;
use forma_core::types::DbId;

use crate::error::StoreError;
use crate::models::batch::{Batch, NewJobRow, StatusCounts};
use crate::models::job::Job;
use crate::models::job_log::{LogEntry, NewLogEntry};
use crate::models::warning::{JobWarning, NewWarning, WarningChanges};

/// Durable record of batches and jobs.
///
/// Job writes are optimistic: [`JobStore::update_job`] only succeeds when
/// the stored version still equals the version the caller read, and the
/// accompanying log entries are written in the same unit of work.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create a batch and one queued job per row at `Ingested`.
    async fn create_batch(
        &self,
        uploaded_by: &str,
        rows: &[NewJobRow],
    ) -> Result<(Batch, Vec<Job>), StoreError>;

    async fn find_batch(&self, batch_id: DbId) -> Result<Option<Batch>, StoreError>;

    /// Mark a batch archived. Returns `None` if it does not exist.
    async fn archive_batch(&self, batch_id: DbId) -> Result<Option<Batch>, StoreError>;

    async fn status_counts(&self, batch_id: DbId) -> Result<StatusCounts, StoreError>;

    async fn find_job(&self, job_id: DbId) -> Result<Option<Job>, StoreError>;

    async fn list_jobs_by_batch(&self, batch_id: DbId) -> Result<Vec<Job>, StoreError>;

    /// Queued jobs at automated stages, highest priority then oldest first.
    async fn list_runnable(
        &self,
        batch_id: Option<DbId>,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError>;

    /// Persist `job` and append `entries`, if the stored version is
    /// `expected_version`. A compound move (e.g. approval straight through
    /// validation) carries one entry per hop. Returns the stored job with
    /// its new version.
    async fn update_job(
        &self,
        job: &Job,
        expected_version: i64,
        entries: &[NewLogEntry],
    ) -> Result<Job, StoreError> {
        self.update_job_with_warnings(job, expected_version, entries, &WarningChanges::default())
            .await
            .map(|(job, _)| job)
    }

    /// [`update_job`](Self::update_job) that also applies `warnings` in the
    /// same unit of work. Returns the stored job and the warnings created.
    async fn update_job_with_warnings(
        &self,
        job: &Job,
        expected_version: i64,
        entries: &[NewLogEntry],
        warnings: &WarningChanges,
    ) -> Result<(Job, Vec<JobWarning>), StoreError>;

    async fn append_warnings(
        &self,
        job_id: DbId,
        warnings: &[NewWarning],
    ) -> Result<Vec<JobWarning>, StoreError>;

    async fn list_warnings(
        &self,
        job_id: DbId,
        include_resolved: bool,
    ) -> Result<Vec<JobWarning>, StoreError>;

    /// Resolve every open warning a stage produced for a job. Returns the
    /// number resolved.
    async fn resolve_stage_warnings(&self, job_id: DbId, stage: Stage) -> Result<u64, StoreError>;

    async fn resolve_warning(&self, warning_id: DbId) -> Result<Option<JobWarning>, StoreError>;

    /// Most recent entries first.
    async fn list_log(&self, job_id: DbId, limit: i64) -> Result<Vec<LogEntry>, StoreError>;
}
