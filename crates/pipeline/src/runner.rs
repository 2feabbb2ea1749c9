//! Executes the automated work of a job's current stage.
//!
//! The runner claims the job, does the stage's work through the collaborator
//! traits, and records the result. A failure inside the stage is caught
//! here, classified, and stored on the job with `error` status; it is never
//! returned to the caller as an error. Store errors (including losing a
//! claim race) are returned unchanged.

use std::sync::Arc;

use forma_core::collaborators::{CollaboratorError, Extractor, RenderRequest, Renderer};
use forma_core::content::ExtractionResult;
use forma_core::error::CoreError;
use forma_core::error_category::ErrorCategory;
use forma_core::stages::Stage;
use forma_core::types::{worker_actor, DbId};
use forma_db::models::job::Job;

use crate::error::{PipelineError, PipelineResult};
use crate::transitions::StageTransitionManager;

/// Why a stage stopped.
enum StageFailure {
    Collaborator(CollaboratorError),
    /// The render collaborator answered but reported no artifact.
    Render(String),
    /// Stored data could not be processed (missing payloads, bad geometry).
    Data(CoreError),
    /// Not a stage failure: the write itself failed.
    Pipeline(PipelineError),
}

impl From<PipelineError> for StageFailure {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Core(
                e @ (CoreError::DataIntegrity(_) | CoreError::Validation(_) | CoreError::Guard(_)),
            ) => StageFailure::Data(e),
            other => StageFailure::Pipeline(other),
        }
    }
}

impl From<CollaboratorError> for StageFailure {
    fn from(err: CollaboratorError) -> Self {
        StageFailure::Collaborator(err)
    }
}

pub struct StageRunner {
    transitions: Arc<StageTransitionManager>,
    extractor: Arc<dyn Extractor>,
    renderer: Arc<dyn Renderer>,
    worker_name: String,
}

impl StageRunner {
    pub fn new(
        transitions: Arc<StageTransitionManager>,
        extractor: Arc<dyn Extractor>,
        renderer: Arc<dyn Renderer>,
        worker_name: impl Into<String>,
    ) -> Self {
        Self {
            transitions,
            extractor,
            renderer,
            worker_name: worker_name.into(),
        }
    }

    pub fn worker_name(&self) -> &str {
        &self.worker_name
    }

    /// Run a queued job forward until it reaches a human gate, completes
    /// or fails. Returns the job as last stored.
    pub async fn run(&self, job_id: DbId) -> PipelineResult<Job> {
        loop {
            let claimed = self.transitions.claim(job_id, &self.worker_name).await?;
            tracing::debug!(
                job_id,
                stage = %claimed.stage,
                worker = %self.worker_name,
                "Job claimed",
            );

            let next = match self.execute(&claimed).await {
                Ok(next) => next,
                Err(StageFailure::Pipeline(e)) => return Err(e),
                Err(failure) => return self.record_failure(&claimed, failure).await,
            };
            if !next.is_runnable() {
                return Ok(next);
            }
        }
    }

    async fn execute(&self, job: &Job) -> Result<Job, StageFailure> {
        match job.stage {
            Stage::Ingested => {
                let extraction = self.extract(job).await?;
                Ok(self.transitions.record_extraction(job, extraction).await?)
            }
            Stage::Extracted => {
                // A retry at this stage clears the extraction; fetch it again.
                let extraction = match &job.payloads.extraction {
                    Some(extraction) => extraction.clone(),
                    None => self.extract(job).await?,
                };
                Ok(self.transitions.record_matches(job, extraction).await?.job)
            }
            Stage::Validating => Ok(self.transitions.run_validation(job).await?.job),
            Stage::Generating => self.generate(job).await,
            other => Err(StageFailure::Data(CoreError::Guard(format!(
                "Stage '{other}' has no automated work"
            )))),
        }
    }

    async fn extract(&self, job: &Job) -> Result<ExtractionResult, StageFailure> {
        let extraction = self
            .extractor
            .extract(&job.source_path, &job.template_path)
            .await?;
        tracing::debug!(
            job_id = job.id,
            elements = extraction.elements.len(),
            slots = extraction.slots.len(),
            "Extraction received",
        );
        Ok(extraction)
    }

    async fn generate(&self, job: &Job) -> Result<Job, StageFailure> {
        let approval = job.payloads.current_approval().ok_or_else(|| {
            StageFailure::Data(CoreError::Guard(format!(
                "Job {} has no current approved associations to render",
                job.id
            )))
        })?;
        if !job.payloads.validation_passes() {
            return Err(StageFailure::Data(CoreError::Guard(format!(
                "Job {} has no passing or overridden validation",
                job.id
            ))));
        }

        let request = RenderRequest {
            associations: approval.associations.clone(),
            template_path: job.template_path.clone(),
            output_name: job.output_name.clone(),
        };
        let outcome = self.renderer.render(&request).await?;
        match (outcome.success, outcome.artifact_path) {
            (true, Some(path)) => Ok(self.transitions.record_generation(job, &path).await?),
            _ => Err(StageFailure::Render(
                outcome
                    .message
                    .unwrap_or_else(|| "render reported no artifact".to_string()),
            )),
        }
    }

    async fn record_failure(&self, job: &Job, failure: StageFailure) -> PipelineResult<Job> {
        let (category, message) = match failure {
            StageFailure::Collaborator(e) => (e.category(), e.to_string()),
            StageFailure::Render(msg) => (ErrorCategory::classify(&msg), msg),
            StageFailure::Data(e) => {
                let msg = e.to_string();
                let category = match ErrorCategory::classify(&msg) {
                    ErrorCategory::Unknown => ErrorCategory::MatchingError,
                    c => c,
                };
                (category, msg)
            }
            StageFailure::Pipeline(e) => return Err(e),
        };

        tracing::error!(
            job_id = job.id,
            stage = %job.stage,
            category = category.as_str(),
            error = %message,
            "Stage failed",
        );
        self.transitions
            .fail(job, &worker_actor(&self.worker_name), category, &message)
            .await
    }
}
