//! Recovery of failed jobs: diagnosis, single and bulk retry, checkpoint
//! resets and per-batch retry statistics.
//!
//! Resume-point decisions come from `forma_core::recovery`; this module
//! applies them through the transition manager's write path so every
//! re-open is versioned and logged as a `recovery` transition.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;

use forma_core::error::CoreError;
use forma_core::error_category::ErrorCategory;
use forma_core::recovery::{check_retry_stage, diagnose, restart_stage, Checkpoint, Diagnosis};
use forma_core::stages::{JobStatus, Stage, TransitionKind};
use forma_core::types::{DbId, SYSTEM_ACTOR};
use forma_db::models::job::Job;

use crate::error::{PipelineError, PipelineResult};
use crate::transitions::{Hop, StageTransitionManager};

/// Default number of retries run at once by [`RecoveryService::bulk_retry`].
pub const DEFAULT_BULK_RETRY_CONCURRENCY: usize = 8;

/// Which jobs a bulk retry covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryTarget {
    /// Every job of the batch that is in `error`.
    Batch(DbId),
    /// These jobs; each one not in `error` is reported as a failed outcome.
    Jobs(Vec<DbId>),
}

/// Result of retrying one job inside a bulk retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetryOutcome {
    pub job_id: DbId,
    pub success: bool,
    /// Stage the job was re-queued at.
    pub stage: Option<Stage>,
    pub error_code: Option<&'static str>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkRetryReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Ordered by job id.
    pub outcomes: Vec<RetryOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveryStats {
    pub batch_id: DbId,
    pub total_jobs: usize,
    pub jobs_in_error: usize,
    /// Jobs retried at least once.
    pub jobs_retried: usize,
    pub total_retries: i64,
    pub average_retries: f64,
    /// Last recorded failure category of each job that ever failed.
    pub categories: BTreeMap<ErrorCategory, usize>,
}

impl RecoveryStats {
    fn from_jobs(batch_id: DbId, jobs: &[Job]) -> Self {
        let total_retries: i64 = jobs.iter().map(|j| i64::from(j.retry_count)).sum();
        let mut categories = BTreeMap::new();
        for error in jobs.iter().filter_map(|j| j.last_error.as_ref()) {
            *categories.entry(error.category).or_insert(0) += 1;
        }
        Self {
            batch_id,
            total_jobs: jobs.len(),
            jobs_in_error: jobs.iter().filter(|j| j.is_in_error()).count(),
            jobs_retried: jobs.iter().filter(|j| j.retry_count > 0).count(),
            total_retries,
            average_retries: if jobs.is_empty() {
                0.0
            } else {
                total_retries as f64 / jobs.len() as f64
            },
            categories,
        }
    }
}

pub struct RecoveryService {
    transitions: Arc<StageTransitionManager>,
    bulk_concurrency: usize,
}

impl RecoveryService {
    pub fn new(transitions: Arc<StageTransitionManager>, bulk_concurrency: usize) -> Self {
        Self {
            transitions,
            bulk_concurrency: bulk_concurrency.max(1),
        }
    }

    /// Classify the job's last failure and pick a restart stage. Read-only.
    pub async fn diagnose(&self, job_id: DbId) -> PipelineResult<Diagnosis> {
        let job = self.transitions.load(job_id).await?;
        let error = job.last_error.as_ref().ok_or_else(|| {
            PipelineError::validation(format!("Job {job_id} has no recorded failure"))
        })?;
        Ok(diagnose(error, &job.payloads))
    }

    /// Re-queue a failed job at `from_stage`, or at the latest stage whose
    /// inputs are still stored. Only payloads at or after that stage are
    /// cleared.
    pub async fn retry(&self, job_id: DbId, from_stage: Option<Stage>) -> PipelineResult<Job> {
        let job = self.transitions.load(job_id).await?;
        expect_error(&job)?;

        let stage = match from_stage {
            Some(stage) => {
                check_retry_stage(stage, &job.payloads)?;
                stage
            }
            // Same answer `diagnose` gives.
            None => restart_stage(&job.payloads, job.stage),
        };

        let message = format!("retry from '{stage}'");
        self.reopen(&job, stage, &message).await
    }

    /// Reset a failed job to a named checkpoint.
    pub async fn reset_to_checkpoint(&self, job_id: DbId, checkpoint: &str) -> PipelineResult<Job> {
        let checkpoint = Checkpoint::parse(checkpoint)?;
        let job = self.transitions.load(job_id).await?;
        expect_error(&job)?;
        checkpoint.check_available(&job.payloads)?;

        let message = format!("reset to checkpoint '{}'", checkpoint.as_str());
        self.reopen(&job, checkpoint.stage(), &message).await
    }

    /// Retry every targeted job independently. One failing retry never stops
    /// the others.
    pub async fn bulk_retry(
        &self,
        target: RetryTarget,
        from_stage: Option<Stage>,
    ) -> PipelineResult<BulkRetryReport> {
        let job_ids = match target {
            RetryTarget::Batch(batch_id) => {
                let store = self.transitions.store();
                if store.find_batch(batch_id).await?.is_none() {
                    return Err(PipelineError::not_found("batch", batch_id));
                }
                store
                    .list_jobs_by_batch(batch_id)
                    .await?
                    .into_iter()
                    .filter(Job::is_in_error)
                    .map(|j| j.id)
                    .collect()
            }
            RetryTarget::Jobs(ids) => ids,
        };

        let mut outcomes: Vec<RetryOutcome> = stream::iter(job_ids)
            .map(|job_id| async move {
                match self.retry(job_id, from_stage).await {
                    Ok(job) => RetryOutcome {
                        job_id,
                        success: true,
                        stage: Some(job.stage),
                        error_code: None,
                        message: None,
                    },
                    Err(e) => {
                        tracing::warn!(job_id, error = %e, "Bulk retry skipped job");
                        RetryOutcome {
                            job_id,
                            success: false,
                            stage: None,
                            error_code: Some(e.code()),
                            message: Some(e.to_string()),
                        }
                    }
                }
            })
            .buffer_unordered(self.bulk_concurrency)
            .collect()
            .await;
        outcomes.sort_by_key(|o| o.job_id);

        let succeeded = outcomes.iter().filter(|o| o.success).count();
        let report = BulkRetryReport {
            attempted: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
            outcomes,
        };
        tracing::info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            "Bulk retry finished",
        );
        Ok(report)
    }

    pub async fn stats(&self, batch_id: DbId) -> PipelineResult<RecoveryStats> {
        let store = self.transitions.store();
        if store.find_batch(batch_id).await?.is_none() {
            return Err(PipelineError::not_found("batch", batch_id));
        }
        let jobs = store.list_jobs_by_batch(batch_id).await?;
        Ok(RecoveryStats::from_jobs(batch_id, &jobs))
    }

    /// Put `job` back in the queue at `stage`, dropping what that stage and
    /// its successors produced.
    async fn reopen(&self, job: &Job, stage: Stage, message: &str) -> PipelineResult<Job> {
        if stage > job.stage {
            return Err(PipelineError::guard(format!(
                "Cannot restart job {} at '{stage}': it failed at '{}'",
                job.id, job.stage
            )));
        }

        let mut next = job.clone();
        next.payloads.clear_from(stage);
        if stage <= Stage::Validating {
            next.stage_override = false;
        }
        next.completions.truncate_after(stage);
        next.stage = stage;
        next.status = JobStatus::Queued;
        next.retry_count += 1;
        next.last_retry_at = Some(Utc::now());

        let saved = self
            .transitions
            .commit(
                job,
                next,
                &[Hop::new(TransitionKind::Recovery, stage, JobStatus::Queued)],
                SYSTEM_ACTOR,
                Some(message),
            )
            .await?;

        tracing::info!(
            job_id = saved.id,
            stage = %stage,
            retry_count = saved.retry_count,
            "Job re-queued",
        );
        Ok(saved)
    }
}

fn expect_error(job: &Job) -> PipelineResult<()> {
    if job.status != JobStatus::Error {
        return Err(CoreError::Guard(format!(
            "Job {} is '{}'; only jobs in error can be recovered",
            job.id, job.status
        ))
        .into());
    }
    Ok(())
}
