//! End-to-end runs through the pipeline against the in-memory store.

mod common;

use forma_core::collaborators::CollaboratorError;
use forma_core::error_category::ErrorCategory;
use forma_core::stages::{JobStatus, Stage, TransitionKind};
use forma_core::validation::{IssueSeverity, IssueType};
use forma_db::JobStore;

use common::{distorted_extraction, harness, passing_extraction, REVIEWER};

// ---------------------------------------------------------------------------
// Within tolerance: auto-advance
// ---------------------------------------------------------------------------

#[tokio::test]
async fn passing_validation_auto_advances_to_generating() {
    let h = harness(passing_extraction());
    let job = h.job_at_matching_review().await;

    let outcome = h.approve_proposed(&job).await;

    assert_eq!(outcome.job.stage, Stage::Generating);
    assert_eq!(outcome.job.status, JobStatus::Queued);
    let report = outcome.job.payloads.validation.as_ref().unwrap();
    assert!(report.valid);
    assert!(report.critical.is_empty());
    assert!(outcome
        .issues
        .iter()
        .all(|i| i.severity != IssueSeverity::Critical));

    let skipped = outcome
        .job
        .completions
        .get(Stage::ValidationReview)
        .unwrap();
    assert!(skipped.skipped);

    // Approval and verdict are two logged hops of one write.
    let log = h.store.list_log(job.id, 10).await.unwrap();
    assert_eq!(log[0].from_stage, Stage::Validating);
    assert_eq!(log[0].to_stage, Stage::Generating);
    assert_eq!(log[1].from_stage, Stage::MatchingReview);
    assert_eq!(log[1].to_stage, Stage::Validating);
    assert_eq!(log[1].actor, REVIEWER);
}

#[tokio::test]
async fn approved_job_renders_and_completes() {
    let h = harness(passing_extraction());
    let job = h.job_at_matching_review().await;
    h.approve_proposed(&job).await;

    let outcomes = h
        .orchestrator
        .start_processing(job.batch_id, None)
        .await
        .unwrap();
    assert_eq!(outcomes[0].stage, Some(Stage::ReadyForDelivery));

    let ready = h.job(job.id).await;
    assert_eq!(
        ready.payloads.artifact.as_ref().unwrap().artifact_path,
        "/out/leaderboard_0.png"
    );

    let done = h
        .orchestrator
        .confirm_delivery(job.id, REVIEWER)
        .await
        .unwrap();
    assert_eq!(done.stage, Stage::Completed);
    assert_eq!(done.status, JobStatus::Completed);
    for stage in Stage::Completed.through() {
        assert!(done.completions.contains(stage), "missing record for {stage}");
    }
    assert_eq!(h.renderer.calls(), 1);
}

// ---------------------------------------------------------------------------
// Distorted: human review
// ---------------------------------------------------------------------------

#[tokio::test]
async fn distorted_slot_enters_validation_review() {
    let h = harness(distorted_extraction());
    let job = h.job_at_matching_review().await;

    let outcome = h.approve_proposed(&job).await;

    assert_eq!(outcome.job.stage, Stage::ValidationReview);
    assert_eq!(outcome.job.status, JobStatus::AwaitingReview);
    let report = outcome.job.payloads.validation.as_ref().unwrap();
    assert!(!report.valid);
    assert_eq!(report.critical.len(), 1);
    assert_eq!(report.critical[0].issue_type, IssueType::AspectRatioMismatch);
    assert!(report.critical[0].message.contains("visibly distorted"));

    // One warning per issue, produced by validation.
    assert_eq!(outcome.warnings.len(), outcome.issues.len());
    assert!(outcome.warnings.iter().all(|w| w.stage == Stage::Validating));
    assert!(!outcome.job.completions.get(Stage::ValidationReview).unwrap().skipped);
}

// ---------------------------------------------------------------------------
// Override
// ---------------------------------------------------------------------------

#[tokio::test]
async fn override_advances_with_logged_reason() {
    let h = harness(distorted_extraction());
    let job = h.job_at_matching_review().await;
    h.approve_proposed(&job).await;

    let outcome = h
        .orchestrator
        .override_validation(job.id, REVIEWER, "client approved")
        .await
        .unwrap();

    assert_eq!(outcome.job.stage, Stage::Generating);
    assert_eq!(outcome.job.status, JobStatus::Queued);
    assert!(outcome.job.stage_override);
    let decision = outcome
        .job
        .payloads
        .validation
        .as_ref()
        .unwrap()
        .override_decision
        .as_ref()
        .unwrap();
    assert_eq!(decision.reason, "client approved");
    assert_eq!(decision.actor, REVIEWER);

    let detail = h.orchestrator.get_job(job.id).await.unwrap();
    let last = &detail.recent_log[0];
    assert_eq!(last.kind, TransitionKind::Override);
    assert_eq!(last.message.as_deref(), Some("client approved"));
}

// ---------------------------------------------------------------------------
// Failure during generation resumes at generation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generation_failure_resumes_at_generating() {
    let h = harness(passing_extraction());
    let job = h.job_at_matching_review().await;
    let approved = h.approve_proposed(&job).await.job;

    h.renderer.fail_next(CollaboratorError::Timeout(30));
    h.orchestrator
        .start_processing(job.batch_id, None)
        .await
        .unwrap();

    let failed = h.job(job.id).await;
    assert_eq!(failed.stage, Stage::Generating);
    assert_eq!(failed.status, JobStatus::Error);
    assert_eq!(
        failed.last_error.as_ref().unwrap().category,
        ErrorCategory::Timeout
    );

    let diagnosis = h.orchestrator.diagnose(job.id).await.unwrap();
    assert_eq!(diagnosis.restart_stage, Stage::Generating);
    assert_eq!(diagnosis.failed_stage, Stage::Generating);
    assert!(diagnosis.retry_recommended);

    let retried = h.orchestrator.retry(job.id, None).await.unwrap();
    assert_eq!(retried.stage, Stage::Generating);
    assert_eq!(retried.status, JobStatus::Queued);
    assert_eq!(retried.retry_count, 1);
    assert!(retried.last_retry_at.is_some());
    // Nothing upstream of generation was touched.
    assert_eq!(retried.payloads.extraction, approved.payloads.extraction);
    assert_eq!(retried.payloads.approved, approved.payloads.approved);
    assert_eq!(retried.payloads.validation, approved.payloads.validation);

    h.orchestrator
        .start_processing(job.batch_id, None)
        .await
        .unwrap();
    assert_eq!(h.job(job.id).await.stage, Stage::ReadyForDelivery);
    // Extraction ran once; the retry did not redo it.
    assert_eq!(h.extractor.calls(), 1);
}
