//! Transport-agnostic facade over the pipeline services.
//!
//! Each method is one operation a caller (HTTP handler, CLI, test) can
//! perform. Reads go straight to the store; every state change goes through
//! the transition manager or the recovery service.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::Serialize;
use validator::Validate;

use forma_core::collaborators::{Extractor, Renderer};
use forma_core::matching::{Association, MatchingConfig, MatchingEngine};
use forma_core::recovery::Diagnosis;
use forma_core::stages::{JobStatus, Stage};
use forma_core::types::DbId;
use forma_core::validation::ValidationEngine;
use forma_db::models::batch::{Batch, BatchSummary, NewJobRow};
use forma_db::models::job::Job;
use forma_db::models::job_log::LogEntry;
use forma_db::models::warning::JobWarning;
use forma_db::JobStore;
use forma_events::bus::BATCH_CREATED;
use forma_events::{EventBus, PipelineEvent};

use crate::error::{PipelineError, PipelineResult};
use crate::recovery::{
    BulkRetryReport, RecoveryService, RecoveryStats, RetryTarget, DEFAULT_BULK_RETRY_CONCURRENCY,
};
use crate::runner::StageRunner;
use crate::transitions::{StageTransitionManager, TransitionOutcome};

/// Tunables shared by the pipeline services.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub worker_name: String,
    pub confidence_floor: f64,
    /// Jobs run at once by `start_processing`.
    pub max_concurrent_jobs: usize,
    pub bulk_retry_concurrency: usize,
    /// Log entries returned with a job.
    pub recent_log_limit: i64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            worker_name: "local".to_string(),
            confidence_floor: MatchingConfig::default().confidence_floor,
            max_concurrent_jobs: 4,
            bulk_retry_concurrency: DEFAULT_BULK_RETRY_CONCURRENCY,
            recent_log_limit: 50,
        }
    }
}

/// A job with its open and resolved warnings and recent history.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    pub job: Job,
    pub warnings: Vec<JobWarning>,
    /// Newest first.
    pub recent_log: Vec<LogEntry>,
}

/// Rows that failed their checks are left out of the batch and reported
/// here; the rest are stored.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedBatch {
    pub batch: Batch,
    pub jobs: Vec<Job>,
    pub row_errors: Vec<RowError>,
}

/// Why one input row was not stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    /// 1-based position in the submitted rows.
    pub row: usize,
    /// Offending fields, sorted.
    pub fields: Vec<String>,
    pub message: String,
}

/// Where one job ended up after `start_processing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunOutcome {
    pub job_id: DbId,
    pub stage: Option<Stage>,
    pub status: Option<JobStatus>,
    pub error_code: Option<&'static str>,
    pub message: Option<String>,
}

pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    bus: Arc<EventBus>,
    transitions: Arc<StageTransitionManager>,
    runner: Arc<StageRunner>,
    recovery: RecoveryService,
    settings: PipelineSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        bus: Arc<EventBus>,
        extractor: Arc<dyn Extractor>,
        renderer: Arc<dyn Renderer>,
        settings: PipelineSettings,
    ) -> PipelineResult<Self> {
        let matching = MatchingEngine::new(MatchingConfig {
            confidence_floor: settings.confidence_floor,
        })?;
        let transitions = Arc::new(StageTransitionManager::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            matching,
            ValidationEngine::new(),
        ));
        let runner = Arc::new(StageRunner::new(
            Arc::clone(&transitions),
            extractor,
            renderer,
            settings.worker_name.clone(),
        ));
        let recovery =
            RecoveryService::new(Arc::clone(&transitions), settings.bulk_retry_concurrency);

        Ok(Self {
            store,
            bus,
            transitions,
            runner,
            recovery,
            settings,
        })
    }

    pub fn runner(&self) -> Arc<StageRunner> {
        Arc::clone(&self.runner)
    }

    pub fn transitions(&self) -> &StageTransitionManager {
        &self.transitions
    }

    pub fn recovery(&self) -> &RecoveryService {
        &self.recovery
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.bus
    }

    // -----------------------------------------------------------------------
    // Batches
    // -----------------------------------------------------------------------

    /// Create a batch from already-parsed rows. Every row is checked; the
    /// valid ones become jobs and the rest come back as `row_errors`. Fails
    /// without storing anything when no row is valid.
    pub async fn create_batch(
        &self,
        rows: &[NewJobRow],
        uploaded_by: &str,
    ) -> PipelineResult<CreatedBatch> {
        if uploaded_by.trim().is_empty() {
            return Err(PipelineError::validation("Uploader identity is required"));
        }
        if rows.is_empty() {
            return Err(PipelineError::validation("A batch needs at least one row"));
        }
        let mut valid = Vec::with_capacity(rows.len());
        let mut row_errors = Vec::new();
        for (i, row) in rows.iter().enumerate() {
            match row.validate() {
                Ok(()) => valid.push(row.clone()),
                Err(e) => {
                    let mut fields: Vec<String> =
                        e.field_errors().keys().map(|k| k.to_string()).collect();
                    fields.sort();
                    row_errors.push(RowError {
                        row: i + 1,
                        fields,
                        message: e.to_string(),
                    });
                }
            }
        }
        if valid.is_empty() {
            let detail = row_errors
                .iter()
                .map(|r| format!("Row {}: {}", r.row, r.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(PipelineError::validation(format!("No valid rows: {detail}")));
        }

        let (batch, jobs) = self.store.create_batch(uploaded_by, &valid).await?;
        self.bus.publish(
            PipelineEvent::new(BATCH_CREATED)
                .with_batch(batch.id)
                .with_actor(uploaded_by)
                .with_payload(serde_json::json!({
                    "row_count": batch.row_count,
                    "rejected_rows": row_errors.len(),
                })),
        );
        tracing::info!(
            batch_id = batch.id,
            row_count = batch.row_count,
            rejected_rows = row_errors.len(),
            uploaded_by,
            "Batch created",
        );
        Ok(CreatedBatch {
            batch,
            jobs,
            row_errors,
        })
    }

    pub async fn get_batch(&self, batch_id: DbId) -> PipelineResult<BatchSummary> {
        let batch = self.find_batch(batch_id).await?;
        let counts = self.store.status_counts(batch_id).await?;
        Ok(BatchSummary { batch, counts })
    }

    pub async fn archive_batch(&self, batch_id: DbId) -> PipelineResult<Batch> {
        let batch = self
            .store
            .archive_batch(batch_id)
            .await?
            .ok_or(PipelineError::not_found("batch", batch_id))?;
        tracing::info!(batch_id, "Batch archived");
        Ok(batch)
    }

    /// Run the batch's queued automated-stage jobs until each reaches a human
    /// gate, completes or fails. At most `limit` jobs are picked up.
    pub async fn start_processing(
        &self,
        batch_id: DbId,
        limit: Option<i64>,
    ) -> PipelineResult<Vec<RunOutcome>> {
        let batch = self.find_batch(batch_id).await?;
        if batch.is_archived() {
            return Err(PipelineError::guard(format!("Batch {batch_id} is archived")));
        }

        let limit = limit.unwrap_or(i64::from(batch.row_count.max(1)));
        let jobs = self.store.list_runnable(Some(batch_id), limit).await?;
        tracing::info!(batch_id, jobs = jobs.len(), "Processing started");

        let runner = &self.runner;
        let mut outcomes: Vec<RunOutcome> = stream::iter(jobs)
            .map(|job| async move {
                match runner.run(job.id).await {
                    Ok(job) => {
                        let message = match job.status {
                            JobStatus::Error => job.last_error.as_ref().map(|e| e.message.clone()),
                            _ => None,
                        };
                        RunOutcome {
                            job_id: job.id,
                            stage: Some(job.stage),
                            status: Some(job.status),
                            error_code: None,
                            message,
                        }
                    }
                    Err(e) => RunOutcome {
                        job_id: job.id,
                        stage: None,
                        status: None,
                        error_code: Some(e.code()),
                        message: Some(e.to_string()),
                    },
                }
            })
            .buffer_unordered(self.settings.max_concurrent_jobs.max(1))
            .collect()
            .await;
        outcomes.sort_by_key(|o| o.job_id);
        Ok(outcomes)
    }

    // -----------------------------------------------------------------------
    // Jobs
    // -----------------------------------------------------------------------

    pub async fn get_job(&self, job_id: DbId) -> PipelineResult<JobDetail> {
        let job = self.transitions.load(job_id).await?;
        let warnings = self.store.list_warnings(job_id, true).await?;
        let recent_log = self
            .store
            .list_log(job_id, self.settings.recent_log_limit)
            .await?;
        Ok(JobDetail {
            job,
            warnings,
            recent_log,
        })
    }

    pub async fn approve_matching(
        &self,
        job_id: DbId,
        actor: &str,
        associations: Vec<Association>,
    ) -> PipelineResult<TransitionOutcome> {
        self.transitions
            .approve_matching(job_id, actor, associations)
            .await
    }

    pub async fn override_validation(
        &self,
        job_id: DbId,
        actor: &str,
        reason: &str,
    ) -> PipelineResult<TransitionOutcome> {
        self.transitions
            .override_validation(job_id, actor, reason)
            .await
    }

    pub async fn return_to_matching(
        &self,
        job_id: DbId,
        actor: &str,
    ) -> PipelineResult<TransitionOutcome> {
        self.transitions.return_to_matching(job_id, actor).await
    }

    pub async fn confirm_delivery(&self, job_id: DbId, actor: &str) -> PipelineResult<Job> {
        self.transitions.confirm_delivery(job_id, actor).await
    }

    pub async fn cancel_job(&self, job_id: DbId, actor: &str, reason: &str) -> PipelineResult<Job> {
        self.transitions.cancel(job_id, actor, reason).await
    }

    pub async fn resolve_warning(&self, warning_id: DbId) -> PipelineResult<JobWarning> {
        self.store
            .resolve_warning(warning_id)
            .await?
            .ok_or(PipelineError::not_found("warning", warning_id))
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    pub async fn diagnose(&self, job_id: DbId) -> PipelineResult<Diagnosis> {
        self.recovery.diagnose(job_id).await
    }

    pub async fn retry(&self, job_id: DbId, from_stage: Option<Stage>) -> PipelineResult<Job> {
        self.recovery.retry(job_id, from_stage).await
    }

    pub async fn bulk_retry(
        &self,
        target: RetryTarget,
        from_stage: Option<Stage>,
    ) -> PipelineResult<BulkRetryReport> {
        self.recovery.bulk_retry(target, from_stage).await
    }

    pub async fn reset_to_checkpoint(
        &self,
        job_id: DbId,
        checkpoint: &str,
    ) -> PipelineResult<Job> {
        self.recovery.reset_to_checkpoint(job_id, checkpoint).await
    }

    pub async fn recovery_stats(&self, batch_id: DbId) -> PipelineResult<RecoveryStats> {
        self.recovery.stats(batch_id).await
    }

    async fn find_batch(&self, batch_id: DbId) -> PipelineResult<Batch> {
        self.store
            .find_batch(batch_id)
            .await?
            .ok_or(PipelineError::not_found("batch", batch_id))
    }
}
