//! Batch-level operations of the facade.

mod common;

use forma_core::stages::{JobStatus, Stage};
use forma_events::bus::BATCH_CREATED;

use common::{harness, passing_extraction, rows, REVIEWER};

#[tokio::test]
async fn create_batch_queues_every_row() {
    let h = harness(passing_extraction());
    let mut rx = h.bus.subscribe();

    let created = h
        .orchestrator
        .create_batch(&rows(3), REVIEWER)
        .await
        .unwrap();

    assert_eq!(created.batch.row_count, 3);
    assert_eq!(created.batch.uploaded_by, REVIEWER);
    assert!(created.row_errors.is_empty());
    assert!(created
        .jobs
        .iter()
        .all(|j| j.stage == Stage::Ingested && j.status == JobStatus::Queued));

    let event = rx.recv().await.unwrap();
    assert_eq!(event.event_type, BATCH_CREATED);
    assert_eq!(event.batch_id, Some(created.batch.id));
}

#[tokio::test]
async fn invalid_rows_are_reported_and_the_rest_stored() {
    let h = harness(passing_extraction());
    let mut input = rows(3);
    input[1].source_path.clear();

    let created = h
        .orchestrator
        .create_batch(&input, REVIEWER)
        .await
        .unwrap();

    assert_eq!(created.batch.row_count, 2);
    assert_eq!(created.jobs.len(), 2);
    let stored: Vec<&str> = created.jobs.iter().map(|j| j.output_name.as_str()).collect();
    assert_eq!(stored, ["leaderboard_0", "leaderboard_2"]);

    assert_eq!(created.row_errors.len(), 1);
    assert_eq!(created.row_errors[0].row, 2);
    assert_eq!(created.row_errors[0].fields, ["source_path"]);
    assert!(created.row_errors[0].message.contains("source_path"));
}

#[tokio::test]
async fn batch_with_no_valid_rows_is_rejected() {
    let h = harness(passing_extraction());
    let mut bad = rows(2);
    bad[0].output_name.clear();
    bad[1].priority = 500;

    let err = h
        .orchestrator
        .create_batch(&bad, REVIEWER)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert!(err.to_string().contains("Row 1"));
    assert!(err.to_string().contains("Row 2"));

    let err = h.orchestrator.create_batch(&[], REVIEWER).await.unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    let err = h
        .orchestrator
        .create_batch(&rows(1), "  ")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
}

#[tokio::test]
async fn batch_summary_counts_statuses() {
    let h = harness(passing_extraction());
    let (batch_id, jobs) = h.batch_at_matching_review(2).await;
    h.approve_proposed(&jobs[0]).await;

    let summary = h.orchestrator.get_batch(batch_id).await.unwrap();
    assert_eq!(summary.counts.total, 2);
    assert_eq!(summary.counts.queued, 1);
    assert_eq!(summary.counts.awaiting_review, 1);
    assert_eq!(summary.batch.id, batch_id);

    let err = h.orchestrator.get_batch(9_999).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

#[tokio::test]
async fn higher_priority_rows_run_first_under_a_limit() {
    let h = harness(passing_extraction());
    let mut input = rows(3);
    input[2].priority = 90;
    let created = h
        .orchestrator
        .create_batch(&input, REVIEWER)
        .await
        .unwrap();

    let outcomes = h
        .orchestrator
        .start_processing(created.batch.id, Some(1))
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].job_id, created.jobs[2].id);
    assert_eq!(outcomes[0].stage, Some(Stage::MatchingReview));
}

#[tokio::test]
async fn archived_batch_is_not_processed() {
    let h = harness(passing_extraction());
    let created = h
        .orchestrator
        .create_batch(&rows(1), REVIEWER)
        .await
        .unwrap();

    let archived = h.orchestrator.archive_batch(created.batch.id).await.unwrap();
    assert!(archived.is_archived());

    let err = h
        .orchestrator
        .start_processing(created.batch.id, None)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "GUARD_VIOLATION");
    assert_eq!(h.extractor.calls(), 0);
}

#[tokio::test]
async fn job_detail_carries_warnings_and_history() {
    let h = harness(passing_extraction());
    let job = h.job_at_matching_review().await;
    h.approve_proposed(&job).await;

    let detail = h.orchestrator.get_job(job.id).await.unwrap();
    assert_eq!(detail.job.stage, Stage::Generating);
    // Resolution and canvas notes from validation.
    assert!(!detail.warnings.is_empty());
    assert_eq!(detail.recent_log.len(), 6);
    assert_eq!(detail.recent_log[0].to_stage, Stage::Generating);
}
