//! The job state machine.
//!
//! [`StageTransitionManager`] is the only code that writes job state outside
//! of recovery. Every write follows the same path: read the job, check the
//! requested move against the transition table and the current status,
//! mutate a copy, and store it with the version that was read. A guard
//! failure returns before anything is written; a version mismatch surfaces
//! as a `CONFLICT` and nothing changes.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use forma_core::content::ExtractionResult;
use forma_core::error::CoreError;
use forma_core::error_category::ErrorCategory;
use forma_core::matching::{check_association_set, Association, MatchingEngine, MatchingResult};
use forma_core::payloads::{ApprovedMatches, ErrorRecord, GeneratedArtifact};
use forma_core::stages::{check_transition, JobStatus, Stage, TransitionKind};
use forma_core::types::{worker_actor, DbId, Timestamp, SYSTEM_ACTOR};
use forma_core::validation::{
    IssueSeverity, ValidationEngine, ValidationIssue, ValidationOverride, ValidationReport,
};
use forma_db::models::job::Job;
use forma_db::models::job_log::NewLogEntry;
use forma_db::models::warning::{
    JobWarning, NewWarning, WarningChanges, CATEGORY_LOW_CONFIDENCE, CATEGORY_UNFILLED_SLOT,
    CATEGORY_UNMATCHED_ELEMENT,
};
use forma_db::JobStore;
use forma_events::bus::{JOB_FAILED, JOB_RETRIED, JOB_TRANSITIONED};
use forma_events::{EventBus, PipelineEvent};

use crate::error::{PipelineError, PipelineResult};

/// One step of a write: the kind of move and the state it lands in.
/// Each hop becomes one log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Hop {
    pub kind: TransitionKind,
    pub stage: Stage,
    pub status: JobStatus,
}

impl Hop {
    pub(crate) fn new(kind: TransitionKind, stage: Stage, status: JobStatus) -> Self {
        Self { kind, stage, status }
    }
}

/// New job state plus whatever the operation produced along the way.
#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub job: Job,
    /// Warnings created by this operation.
    pub warnings: Vec<JobWarning>,
    /// Validation issues, when validation ran.
    pub issues: Vec<ValidationIssue>,
}

impl TransitionOutcome {
    fn job(job: Job) -> Self {
        Self {
            job,
            warnings: Vec::new(),
            issues: Vec::new(),
        }
    }
}

pub struct StageTransitionManager {
    store: Arc<dyn JobStore>,
    bus: Arc<EventBus>,
    matching: MatchingEngine,
    validation: ValidationEngine,
}

impl StageTransitionManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        bus: Arc<EventBus>,
        matching: MatchingEngine,
        validation: ValidationEngine,
    ) -> Self {
        Self {
            store,
            bus,
            matching,
            validation,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub async fn load(&self, job_id: DbId) -> PipelineResult<Job> {
        self.store
            .find_job(job_id)
            .await?
            .ok_or(PipelineError::not_found("job", job_id))
    }

    // -----------------------------------------------------------------------
    // Automated stages
    // -----------------------------------------------------------------------

    /// Take a queued job at an automated stage for execution. Two workers
    /// racing for the same job both read the same version; the loser gets
    /// a conflict.
    pub async fn claim(&self, job_id: DbId, worker_name: &str) -> PipelineResult<Job> {
        let job = self.load(job_id).await?;
        if job.status != JobStatus::Queued {
            return Err(PipelineError::guard(format!(
                "Cannot claim job {job_id}: status is '{}', expected 'queued'",
                job.status
            )));
        }

        let mut next = job.clone();
        next.status = JobStatus::Processing;
        let actor = worker_actor(worker_name);
        self.commit(
            &job,
            next,
            &[Hop::new(TransitionKind::Claim, job.stage, JobStatus::Processing)],
            &actor,
            None,
        )
        .await
    }

    /// `Ingested -> Extracted`.
    pub async fn record_extraction(
        &self,
        job: &Job,
        extraction: ExtractionResult,
    ) -> PipelineResult<Job> {
        expect_state(job, Stage::Ingested, JobStatus::Processing, "record extraction")?;

        let mut next = job.clone();
        next.payloads.extraction = Some(extraction);
        next.completions
            .record(Stage::Extracted, SYSTEM_ACTOR, Utc::now());
        next.stage = Stage::Extracted;
        next.status = JobStatus::Queued;

        self.commit(
            job,
            next,
            &[Hop::new(TransitionKind::Advance, Stage::Extracted, JobStatus::Queued)],
            SYSTEM_ACTOR,
            None,
        )
        .await
    }

    /// `Extracted -> MatchingReview`: run matching over `extraction`, store
    /// both, and raise matching warnings. Warnings from an earlier matching
    /// run of the same job are resolved first.
    pub async fn record_matches(
        &self,
        job: &Job,
        extraction: ExtractionResult,
    ) -> PipelineResult<TransitionOutcome> {
        expect_state(job, Stage::Extracted, JobStatus::Processing, "record matches")?;

        let proposed = self.matching.propose_for(&extraction);
        let warnings = matching_warnings(&proposed);

        let mut next = job.clone();
        next.payloads.extraction = Some(extraction);
        next.payloads.proposed = Some(proposed);
        next.completions
            .record(Stage::MatchingReview, SYSTEM_ACTOR, Utc::now());
        next.stage = Stage::MatchingReview;
        next.status = JobStatus::AwaitingReview;

        let (saved, warnings) = self
            .commit_with_warnings(
                job,
                next,
                &[Hop::new(
                    TransitionKind::Advance,
                    Stage::MatchingReview,
                    JobStatus::AwaitingReview,
                )],
                SYSTEM_ACTOR,
                None,
                &WarningChanges {
                    resolve_stages: vec![Stage::Extracted],
                    append: warnings,
                },
            )
            .await?;

        Ok(TransitionOutcome {
            job: saved,
            warnings,
            issues: Vec::new(),
        })
    }

    /// Re-run validation for a job resumed at `Validating`.
    pub async fn run_validation(&self, job: &Job) -> PipelineResult<TransitionOutcome> {
        expect_state(job, Stage::Validating, JobStatus::Processing, "run validation")?;

        let approval = job.payloads.current_approval().ok_or_else(|| {
            PipelineError::guard(format!("Job {} has no current approved associations", job.id))
        })?;
        let extraction = job.payloads.extraction.as_ref().ok_or_else(|| {
            CoreError::DataIntegrity(format!("Job {} has no extraction result", job.id))
        })?;
        let report = self
            .validation
            .validate_associations(&approval.associations, extraction)?;

        let mut next = job.clone();
        next.payloads.clear_from(Stage::Validating);
        next.stage_override = false;
        let branch = apply_report(&mut next, report.clone(), Utc::now());

        let (saved, warnings) = self
            .commit_with_warnings(
                job,
                next,
                &[branch],
                SYSTEM_ACTOR,
                None,
                &validation_changes(&report),
            )
            .await?;
        Ok(validation_outcome(saved, warnings, &report))
    }

    /// `Generating -> ReadyForDelivery`.
    pub async fn record_generation(&self, job: &Job, artifact_path: &str) -> PipelineResult<Job> {
        expect_state(job, Stage::Generating, JobStatus::Processing, "record generation")?;

        let now = Utc::now();
        let mut next = job.clone();
        next.payloads.artifact = Some(GeneratedArtifact {
            artifact_path: artifact_path.to_string(),
            rendered_at: now,
        });
        next.completions
            .record(Stage::ReadyForDelivery, SYSTEM_ACTOR, now);
        next.stage = Stage::ReadyForDelivery;
        next.status = JobStatus::AwaitingReview;

        self.commit(
            job,
            next,
            &[Hop::new(
                TransitionKind::Advance,
                Stage::ReadyForDelivery,
                JobStatus::AwaitingReview,
            )],
            SYSTEM_ACTOR,
            None,
        )
        .await
    }

    /// Move a job to `error` at its current stage with a structured record.
    pub async fn fail(
        &self,
        job: &Job,
        actor: &str,
        category: ErrorCategory,
        message: &str,
    ) -> PipelineResult<Job> {
        if job.status == JobStatus::Error {
            return Err(PipelineError::guard(format!(
                "Job {} is already in error",
                job.id
            )));
        }

        let mut next = job.clone();
        next.status = JobStatus::Error;
        next.last_error = Some(ErrorRecord {
            stage: job.stage,
            category,
            message: message.to_string(),
            at: Utc::now(),
        });

        self.commit(
            job,
            next,
            &[Hop::new(TransitionKind::Failure, job.stage, JobStatus::Error)],
            actor,
            Some(message),
        )
        .await
    }

    // -----------------------------------------------------------------------
    // Human gates
    // -----------------------------------------------------------------------

    /// `MatchingReview -> Validating -> Generating | ValidationReview`.
    ///
    /// The approved set is checked against the stored extraction, then
    /// validated synchronously; approval and verdict are written together.
    pub async fn approve_matching(
        &self,
        job_id: DbId,
        actor: &str,
        associations: Vec<Association>,
    ) -> PipelineResult<TransitionOutcome> {
        let job = self.load(job_id).await?;
        expect_state(
            &job,
            Stage::MatchingReview,
            JobStatus::AwaitingReview,
            "approve matches",
        )?;
        if associations.is_empty() {
            return Err(PipelineError::validation(
                "At least one association must be approved",
            ));
        }
        let extraction = job.payloads.extraction.as_ref().ok_or_else(|| {
            CoreError::DataIntegrity(format!("Job {job_id} has no extraction result"))
        })?;
        check_association_set(&associations, extraction)?;
        let report = self
            .validation
            .validate_associations(&associations, extraction)?;

        let now = Utc::now();
        let mut next = job.clone();
        next.payloads.clear_from(Stage::Validating);
        next.payloads.approved = Some(ApprovedMatches {
            associations,
            approved_by: actor.to_string(),
            approved_at: now,
            stale: false,
        });
        next.stage_override = false;
        next.completions.record(Stage::Validating, actor, now);
        let branch = apply_report(&mut next, report.clone(), now);

        let hops = [
            Hop::new(
                TransitionKind::Advance,
                Stage::Validating,
                JobStatus::Processing,
            ),
            branch,
        ];
        let (saved, warnings) = self
            .commit_with_warnings(&job, next, &hops, actor, None, &validation_changes(&report))
            .await?;

        tracing::info!(
            job_id,
            actor,
            valid = report.valid,
            critical = report.critical.len(),
            "Matches approved",
        );
        Ok(validation_outcome(saved, warnings, &report))
    }

    /// `ValidationReview -> Generating` with a mandatory justification.
    pub async fn override_validation(
        &self,
        job_id: DbId,
        actor: &str,
        reason: &str,
    ) -> PipelineResult<TransitionOutcome> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(PipelineError::validation(
                "An override requires a non-empty justification",
            ));
        }

        let job = self.load(job_id).await?;
        expect_state(
            &job,
            Stage::ValidationReview,
            JobStatus::AwaitingReview,
            "override validation",
        )?;

        let now = Utc::now();
        let mut next = job.clone();
        let report = next.payloads.validation.as_mut().ok_or_else(|| {
            PipelineError::guard(format!("Job {job_id} has no validation report to override"))
        })?;
        report.override_decision = Some(ValidationOverride {
            reason: reason.to_string(),
            actor: actor.to_string(),
            at: now,
        });
        next.stage_override = true;
        next.completions.record(Stage::Generating, actor, now);
        next.stage = Stage::Generating;
        next.status = JobStatus::Queued;

        let saved = self
            .commit(
                &job,
                next,
                &[Hop::new(
                    TransitionKind::Override,
                    Stage::Generating,
                    JobStatus::Queued,
                )],
                actor,
                Some(reason),
            )
            .await?;

        tracing::warn!(job_id, actor, reason, "Validation overridden");
        Ok(TransitionOutcome::job(saved))
    }

    /// `ValidationReview -> MatchingReview`. The approval is kept but marked
    /// stale; the validation report goes.
    pub async fn return_to_matching(
        &self,
        job_id: DbId,
        actor: &str,
    ) -> PipelineResult<TransitionOutcome> {
        let job = self.load(job_id).await?;
        expect_state(
            &job,
            Stage::ValidationReview,
            JobStatus::AwaitingReview,
            "return to matching",
        )?;

        let mut next = job.clone();
        if let Some(approved) = next.payloads.approved.as_mut() {
            approved.stale = true;
        }
        next.payloads.clear_from(Stage::Validating);
        next.stage_override = false;
        next.completions.truncate_after(Stage::MatchingReview);
        next.stage = Stage::MatchingReview;
        next.status = JobStatus::AwaitingReview;

        let (saved, _) = self
            .commit_with_warnings(
                &job,
                next,
                &[Hop::new(
                    TransitionKind::Rollback,
                    Stage::MatchingReview,
                    JobStatus::AwaitingReview,
                )],
                actor,
                None,
                &WarningChanges {
                    resolve_stages: vec![Stage::Validating],
                    append: Vec::new(),
                },
            )
            .await?;

        Ok(TransitionOutcome::job(saved))
    }

    /// `ReadyForDelivery -> Completed`.
    pub async fn confirm_delivery(&self, job_id: DbId, actor: &str) -> PipelineResult<Job> {
        let job = self.load(job_id).await?;
        expect_state(
            &job,
            Stage::ReadyForDelivery,
            JobStatus::AwaitingReview,
            "confirm delivery",
        )?;

        let mut next = job.clone();
        next.completions.record(Stage::Completed, actor, Utc::now());
        next.stage = Stage::Completed;
        next.status = JobStatus::Completed;

        self.commit(
            &job,
            next,
            &[Hop::new(
                TransitionKind::Advance,
                Stage::Completed,
                JobStatus::Completed,
            )],
            actor,
            None,
        )
        .await
    }

    /// Operator cancel: the job goes to `error` where it stands.
    pub async fn cancel(&self, job_id: DbId, actor: &str, reason: &str) -> PipelineResult<Job> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(PipelineError::validation("A cancel requires a reason"));
        }
        let job = self.load(job_id).await?;
        let message = format!("Cancelled by {actor}: {reason}");
        self.fail(&job, actor, ErrorCategory::classify(reason), &message)
            .await
    }

    // -----------------------------------------------------------------------
    // Write path
    // -----------------------------------------------------------------------

    /// Check every hop, store `after` against the version of `before`, and
    /// publish one event for the write.
    pub(crate) async fn commit(
        &self,
        before: &Job,
        after: Job,
        hops: &[Hop],
        actor: &str,
        message: Option<&str>,
    ) -> PipelineResult<Job> {
        self.commit_with_warnings(before, after, hops, actor, message, &WarningChanges::default())
            .await
            .map(|(job, _)| job)
    }

    /// [`commit`](Self::commit) with warning changes stored in the same
    /// write as the job. A rejected write leaves the warnings untouched.
    pub(crate) async fn commit_with_warnings(
        &self,
        before: &Job,
        after: Job,
        hops: &[Hop],
        actor: &str,
        message: Option<&str>,
        warnings: &WarningChanges,
    ) -> PipelineResult<(Job, Vec<JobWarning>)> {
        let Some(last) = hops.last() else {
            return Err(CoreError::Internal("transition without hops".into()).into());
        };
        if (last.stage, last.status) != (after.stage, after.status) {
            return Err(CoreError::Internal(format!(
                "transition ends at '{}' ({}) but job is at '{}' ({})",
                last.stage, last.status, after.stage, after.status
            ))
            .into());
        }

        let error_category = after.last_error.as_ref().map(|e| e.category);
        let mut entries = Vec::with_capacity(hops.len());
        let (mut from_stage, mut from_status) = (before.stage, before.status);
        for hop in hops {
            check_transition(from_stage, hop.stage, hop.kind)?;
            if !hop.stage.allows_status(hop.status) {
                return Err(CoreError::Internal(format!(
                    "status '{}' is not allowed at stage '{}'",
                    hop.status, hop.stage
                ))
                .into());
            }
            entries.push(NewLogEntry {
                job_id: before.id,
                batch_id: before.batch_id,
                kind: hop.kind,
                from_stage,
                from_status,
                to_stage: hop.stage,
                to_status: hop.status,
                actor: actor.to_string(),
                message: message.map(str::to_string),
                error_category: (hop.kind == TransitionKind::Failure)
                    .then_some(error_category)
                    .flatten(),
            });
            (from_stage, from_status) = (hop.stage, hop.status);
        }

        let (saved, created) = self
            .store
            .update_job_with_warnings(&after, before.version, &entries, warnings)
            .await?;

        let event_type = match last.kind {
            TransitionKind::Failure => JOB_FAILED,
            TransitionKind::Recovery => JOB_RETRIED,
            _ => JOB_TRANSITIONED,
        };
        self.bus.publish(
            PipelineEvent::new(event_type)
                .with_job(saved.batch_id, saved.id)
                .with_state(saved.stage, saved.status)
                .with_actor(actor)
                .with_payload(serde_json::json!({
                    "kind": last.kind.as_str(),
                    "from_stage": before.stage,
                    "from_status": before.status,
                    "version": saved.version,
                })),
        );

        tracing::info!(
            job_id = saved.id,
            batch_id = saved.batch_id,
            kind = last.kind.as_str(),
            from = %before.stage,
            to = %saved.stage,
            status = %saved.status,
            actor,
            "Job transitioned",
        );
        Ok((saved, created))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Supersede the previous validation warnings of the job and raise one per
/// issue in `report`.
fn validation_changes(report: &ValidationReport) -> WarningChanges {
    WarningChanges {
        resolve_stages: vec![Stage::Validating],
        append: validation_warnings(report),
    }
}

fn validation_outcome(
    job: Job,
    warnings: Vec<JobWarning>,
    report: &ValidationReport,
) -> TransitionOutcome {
    TransitionOutcome {
        job,
        warnings,
        issues: report.issues().cloned().collect(),
    }
}

fn expect_state(job: &Job, stage: Stage, status: JobStatus, action: &str) -> PipelineResult<()> {
    if job.stage != stage || job.status != status {
        return Err(PipelineError::guard(format!(
            "Cannot {action}: job {} is at '{}' ({}), expected '{stage}' ({status})",
            job.id, job.stage, job.status
        )));
    }
    Ok(())
}

/// Store the report on `job` and branch on its verdict. A valid report
/// skips validation review.
fn apply_report(job: &mut Job, report: ValidationReport, now: Timestamp) -> Hop {
    let hop = if report.valid {
        job.completions
            .record_skipped(Stage::ValidationReview, SYSTEM_ACTOR, now);
        job.completions.record(Stage::Generating, SYSTEM_ACTOR, now);
        Hop::new(TransitionKind::Advance, Stage::Generating, JobStatus::Queued)
    } else {
        job.completions
            .record(Stage::ValidationReview, SYSTEM_ACTOR, now);
        Hop::new(
            TransitionKind::Advance,
            Stage::ValidationReview,
            JobStatus::AwaitingReview,
        )
    };
    job.payloads.validation = Some(report);
    job.stage = hop.stage;
    job.status = hop.status;
    hop
}

fn matching_warnings(result: &MatchingResult) -> Vec<NewWarning> {
    let mut warnings = Vec::new();
    for slot in &result.stats.unfilled_slots {
        warnings.push(NewWarning {
            stage: Stage::Extracted,
            severity: IssueSeverity::Warning,
            category: CATEGORY_UNFILLED_SLOT.to_string(),
            message: format!("Template slot '{slot}' has no matching source element"),
        });
    }
    for element in &result.stats.unmatched_elements {
        warnings.push(NewWarning {
            stage: Stage::Extracted,
            severity: IssueSeverity::Info,
            category: CATEGORY_UNMATCHED_ELEMENT.to_string(),
            message: format!("Source element '{element}' was not placed in any slot"),
        });
    }
    for a in result.associations.iter().filter(|a| a.requires_review) {
        warnings.push(NewWarning {
            stage: Stage::Extracted,
            severity: IssueSeverity::Warning,
            category: CATEGORY_LOW_CONFIDENCE.to_string(),
            message: format!(
                "'{}' matched to '{}' with confidence {:.2}",
                a.element_name, a.slot_name, a.confidence
            ),
        });
    }
    warnings
}

fn validation_warnings(report: &ValidationReport) -> Vec<NewWarning> {
    report
        .issues()
        .map(|issue| NewWarning {
            stage: Stage::Validating,
            severity: issue.severity,
            category: issue.issue_type.as_str().to_string(),
            message: issue.message.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use forma_core::matching::{MatchingStats, Provenance};
    use forma_core::content::ContentKind;

    use super::*;

    fn stats(unfilled: &[&str], unmatched: &[&str]) -> MatchingStats {
        MatchingStats {
            total_elements: 2,
            total_slots: 2,
            matched_slots: 1,
            coverage: Some(0.5),
            average_confidence: Some(0.4),
            requires_review: 1,
            unmatched_elements: unmatched.iter().map(|s| s.to_string()).collect(),
            unfilled_slots: unfilled.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn matching_warnings_cover_gaps_and_low_confidence() {
        let result = MatchingResult {
            associations: vec![Association {
                element_index: 0,
                element_name: "hero shot".into(),
                slot_index: 0,
                slot_name: "hero".into(),
                kind: ContentKind::Image,
                confidence: 0.4,
                provenance: Provenance::Auto,
                requires_review: true,
            }],
            stats: stats(&["cta"], &["legal"]),
        };

        let warnings = matching_warnings(&result);
        let categories: Vec<&str> = warnings.iter().map(|w| w.category.as_str()).collect();
        assert_eq!(
            categories,
            vec![
                CATEGORY_UNFILLED_SLOT,
                CATEGORY_UNMATCHED_ELEMENT,
                CATEGORY_LOW_CONFIDENCE
            ]
        );
        assert!(warnings.iter().all(|w| w.stage == Stage::Extracted));
        assert!(warnings[2].message.contains("0.40"));
    }

    #[test]
    fn valid_report_skips_review() {
        let mut job = sample_job();
        let hop = apply_report(&mut job, ValidationReport::from_issues(vec![]), Utc::now());
        assert_eq!(hop.stage, Stage::Generating);
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.completions.get(Stage::ValidationReview).unwrap().skipped);
        assert!(job.completions.contains(Stage::Generating));
    }

    fn sample_job() -> Job {
        let now = Utc::now();
        Job {
            id: 1,
            batch_id: 1,
            stage: Stage::Validating,
            status: JobStatus::Processing,
            priority: 0,
            source_path: "/in/a.psd".into(),
            template_path: "/tpl/a.indd".into(),
            output_name: "a".into(),
            completions: Default::default(),
            payloads: Default::default(),
            stage_override: false,
            last_error: None,
            retry_count: 0,
            last_retry_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
