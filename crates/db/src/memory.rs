//! In-process [`JobStore`] for tests and dry runs.
//!
//! Same semantics as the Postgres store: versioned job writes, log entries
//! written together with the job, archived batches excluded from the
//! runnable queue.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use forma_core::payloads::{StageCompletions, StagePayloads};
use forma_core::stages::{JobStatus, Stage};
use forma_core::types::{DbId, SYSTEM_ACTOR};

use crate::error::StoreError;
use crate::models::batch::{Batch, NewJobRow, StatusCounts};
use crate::models::job::Job;
use crate::models::job_log::{LogEntry, NewLogEntry};
use crate::models::warning::{JobWarning, NewWarning, WarningChanges};
use crate::store::JobStore;

#[derive(Default)]
struct Inner {
    next_id: DbId,
    batches: BTreeMap<DbId, Batch>,
    jobs: BTreeMap<DbId, Job>,
    warnings: Vec<JobWarning>,
    log: Vec<LogEntry>,
}

impl Inner {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    fn push_warnings(&mut self, job_id: DbId, warnings: &[NewWarning]) -> Vec<JobWarning> {
        let now = Utc::now();
        let mut created = Vec::with_capacity(warnings.len());
        for w in warnings {
            let warning = JobWarning {
                id: self.next_id(),
                job_id,
                stage: w.stage,
                severity: w.severity,
                category: w.category.clone(),
                message: w.message.clone(),
                resolved: false,
                resolved_at: None,
                created_at: now,
            };
            self.warnings.push(warning.clone());
            created.push(warning);
        }
        created
    }

    fn resolve_stage(&mut self, job_id: DbId, stage: Stage) -> u64 {
        let now = Utc::now();
        let mut n = 0;
        for w in self
            .warnings
            .iter_mut()
            .filter(|w| w.job_id == job_id && w.stage == stage && !w.resolved)
        {
            w.resolved = true;
            w.resolved_at = Some(now);
            n += 1;
        }
        n
    }
}

#[derive(Default)]
pub struct MemoryJobStore {
    inner: RwLock<Inner>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_batch(
        &self,
        uploaded_by: &str,
        rows: &[NewJobRow],
    ) -> Result<(Batch, Vec<Job>), StoreError> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        let batch = Batch {
            id: inner.next_id(),
            row_count: rows.len() as i32,
            uploaded_by: uploaded_by.to_string(),
            archived_at: None,
            created_at: now,
            updated_at: now,
        };
        inner.batches.insert(batch.id, batch.clone());

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let mut completions = StageCompletions::new();
            completions.record(Stage::Ingested, SYSTEM_ACTOR, now);
            let job = Job {
                id: inner.next_id(),
                batch_id: batch.id,
                stage: Stage::Ingested,
                status: JobStatus::Queued,
                priority: row.priority,
                source_path: row.source_path.clone(),
                template_path: row.template_path.clone(),
                output_name: row.output_name.clone(),
                completions,
                payloads: StagePayloads::default(),
                stage_override: false,
                last_error: None,
                retry_count: 0,
                last_retry_at: None,
                version: 0,
                created_at: now,
                updated_at: now,
            };
            inner.jobs.insert(job.id, job.clone());
            jobs.push(job);
        }

        Ok((batch, jobs))
    }

    async fn find_batch(&self, batch_id: DbId) -> Result<Option<Batch>, StoreError> {
        Ok(self.inner.read().await.batches.get(&batch_id).cloned())
    }

    async fn archive_batch(&self, batch_id: DbId) -> Result<Option<Batch>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(batch) = inner.batches.get_mut(&batch_id) else {
            return Ok(None);
        };
        if batch.archived_at.is_none() {
            let now = Utc::now();
            batch.archived_at = Some(now);
            batch.updated_at = now;
        }
        Ok(Some(batch.clone()))
    }

    async fn status_counts(&self, batch_id: DbId) -> Result<StatusCounts, StoreError> {
        let inner = self.inner.read().await;
        let mut counts = StatusCounts::default();
        for job in inner.jobs.values().filter(|j| j.batch_id == batch_id) {
            counts.add(job.status, 1);
        }
        Ok(counts)
    }

    async fn find_job(&self, job_id: DbId) -> Result<Option<Job>, StoreError> {
        Ok(self.inner.read().await.jobs.get(&job_id).cloned())
    }

    async fn list_jobs_by_batch(&self, batch_id: DbId) -> Result<Vec<Job>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .jobs
            .values()
            .filter(|j| j.batch_id == batch_id)
            .cloned()
            .collect())
    }

    async fn list_runnable(
        &self,
        batch_id: Option<DbId>,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let inner = self.inner.read().await;
        let mut jobs: Vec<Job> = inner
            .jobs
            .values()
            .filter(|j| j.is_runnable())
            .filter(|j| batch_id.is_none_or(|b| j.batch_id == b))
            .filter(|j| {
                inner
                    .batches
                    .get(&j.batch_id)
                    .is_some_and(|b| !b.is_archived())
            })
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        jobs.truncate(limit.max(1) as usize);
        Ok(jobs)
    }

    async fn update_job_with_warnings(
        &self,
        job: &Job,
        expected_version: i64,
        entries: &[NewLogEntry],
        warnings: &WarningChanges,
    ) -> Result<(Job, Vec<JobWarning>), StoreError> {
        let mut inner = self.inner.write().await;
        let stored = inner.jobs.get(&job.id).ok_or(StoreError::NotFound {
            entity: "job",
            id: job.id,
        })?;
        if stored.version != expected_version {
            return Err(StoreError::VersionConflict {
                job_id: job.id,
                expected: expected_version,
                found: stored.version,
            });
        }

        let now = Utc::now();
        let mut updated = job.clone();
        updated.version = expected_version + 1;
        updated.updated_at = now;
        updated.created_at = stored.created_at;
        inner.jobs.insert(updated.id, updated.clone());

        for entry in entries {
            let id = inner.next_id();
            inner.log.push(LogEntry {
                id,
                job_id: entry.job_id,
                batch_id: entry.batch_id,
                kind: entry.kind,
                from_stage: entry.from_stage,
                from_status: entry.from_status,
                to_stage: entry.to_stage,
                to_status: entry.to_status,
                actor: entry.actor.clone(),
                message: entry.message.clone(),
                error_category: entry.error_category,
                created_at: now,
            });
        }

        for stage in &warnings.resolve_stages {
            inner.resolve_stage(job.id, *stage);
        }
        let created = inner.push_warnings(job.id, &warnings.append);

        Ok((updated, created))
    }

    async fn append_warnings(
        &self,
        job_id: DbId,
        warnings: &[NewWarning],
    ) -> Result<Vec<JobWarning>, StoreError> {
        let mut inner = self.inner.write().await;
        if !inner.jobs.contains_key(&job_id) {
            return Err(StoreError::NotFound {
                entity: "job",
                id: job_id,
            });
        }
        Ok(inner.push_warnings(job_id, warnings))
    }

    async fn list_warnings(
        &self,
        job_id: DbId,
        include_resolved: bool,
    ) -> Result<Vec<JobWarning>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .warnings
            .iter()
            .filter(|w| w.job_id == job_id && (include_resolved || !w.resolved))
            .cloned()
            .collect())
    }

    async fn resolve_stage_warnings(&self, job_id: DbId, stage: Stage) -> Result<u64, StoreError> {
        Ok(self.inner.write().await.resolve_stage(job_id, stage))
    }

    async fn resolve_warning(&self, warning_id: DbId) -> Result<Option<JobWarning>, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(w) = inner.warnings.iter_mut().find(|w| w.id == warning_id) else {
            return Ok(None);
        };
        if !w.resolved {
            w.resolved = true;
            w.resolved_at = Some(Utc::now());
        }
        Ok(Some(w.clone()))
    }

    async fn list_log(&self, job_id: DbId, limit: i64) -> Result<Vec<LogEntry>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .log
            .iter()
            .rev()
            .filter(|e| e.job_id == job_id)
            .take(limit.max(1) as usize)
            .cloned()
            .collect())
    }
}
