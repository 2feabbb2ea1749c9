//! PostgreSQL-backed [`JobStore`].

use async_trait::async_trait;
use sqlx::PgPool;

use forma_core::stages::Stage;
use forma_core::types::DbId;

use crate::error::StoreError;
use crate::models::batch::{Batch, NewJobRow, StatusCounts};
use crate::models::job::Job;
use crate::models::job_log::{LogEntry, NewLogEntry};
use crate::models::warning::{JobWarning, NewWarning, WarningChanges};
use crate::repositories::{BatchRepo, JobLogRepo, JobRepo, WarningRepo};
use crate::store::JobStore;

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_batch(
        &self,
        uploaded_by: &str,
        rows: &[NewJobRow],
    ) -> Result<(Batch, Vec<Job>), StoreError> {
        BatchRepo::create_with_jobs(&self.pool, uploaded_by, rows).await
    }

    async fn find_batch(&self, batch_id: DbId) -> Result<Option<Batch>, StoreError> {
        Ok(BatchRepo::find_by_id(&self.pool, batch_id).await?)
    }

    async fn archive_batch(&self, batch_id: DbId) -> Result<Option<Batch>, StoreError> {
        Ok(BatchRepo::archive(&self.pool, batch_id).await?)
    }

    async fn status_counts(&self, batch_id: DbId) -> Result<StatusCounts, StoreError> {
        BatchRepo::status_counts(&self.pool, batch_id).await
    }

    async fn find_job(&self, job_id: DbId) -> Result<Option<Job>, StoreError> {
        JobRepo::find_by_id(&self.pool, job_id).await
    }

    async fn list_jobs_by_batch(&self, batch_id: DbId) -> Result<Vec<Job>, StoreError> {
        JobRepo::list_by_batch(&self.pool, batch_id).await
    }

    async fn list_runnable(
        &self,
        batch_id: Option<DbId>,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        JobRepo::list_runnable(&self.pool, batch_id, limit).await
    }

    async fn update_job_with_warnings(
        &self,
        job: &Job,
        expected_version: i64,
        entries: &[NewLogEntry],
        warnings: &WarningChanges,
    ) -> Result<(Job, Vec<JobWarning>), StoreError> {
        JobRepo::update_versioned(&self.pool, job, expected_version, entries, warnings).await
    }

    async fn append_warnings(
        &self,
        job_id: DbId,
        warnings: &[NewWarning],
    ) -> Result<Vec<JobWarning>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let created = WarningRepo::insert_many(&mut tx, job_id, warnings).await?;
        tx.commit().await?;
        Ok(created)
    }

    async fn list_warnings(
        &self,
        job_id: DbId,
        include_resolved: bool,
    ) -> Result<Vec<JobWarning>, StoreError> {
        WarningRepo::list_by_job(&self.pool, job_id, include_resolved).await
    }

    async fn resolve_stage_warnings(&self, job_id: DbId, stage: Stage) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(WarningRepo::resolve_for_stage(&mut conn, job_id, stage).await?)
    }

    async fn resolve_warning(&self, warning_id: DbId) -> Result<Option<JobWarning>, StoreError> {
        WarningRepo::resolve(&self.pool, warning_id).await
    }

    async fn list_log(&self, job_id: DbId, limit: i64) -> Result<Vec<LogEntry>, StoreError> {
        JobLogRepo::list_by_job(&self.pool, job_id, limit).await
    }
}
