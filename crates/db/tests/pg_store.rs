//! Postgres store tests. Require `DATABASE_URL`; run with `--ignored`.

use assert_matches::assert_matches;
use chrono::Utc;
use sqlx::PgPool;

use forma_core::content::{ContentKind, ExtractionResult, SourceElement, TemplateSlot};
use forma_core::geometry::{Canvas, Geometry};
use forma_core::stages::{JobStatus, Stage, TransitionKind};
use forma_core::types::SYSTEM_ACTOR;
use forma_core::validation::IssueSeverity;
use forma_db::models::batch::NewJobRow;
use forma_db::models::job_log::NewLogEntry;
use forma_db::models::warning::{NewWarning, WarningChanges};
use forma_db::{JobStore, PgJobStore, StoreError};

fn rows() -> Vec<NewJobRow> {
    vec![
        NewJobRow {
            source_path: "/in/a.psd".into(),
            template_path: "/tpl/t.indd".into(),
            output_name: "a".into(),
            priority: 1,
        },
        NewJobRow {
            source_path: "/in/b.psd".into(),
            template_path: "/tpl/t.indd".into(),
            output_name: "b".into(),
            priority: 5,
        },
    ]
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn create_and_read_back(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let (batch, jobs) = store.create_batch("ana", &rows()).await.unwrap();
    assert_eq!(batch.row_count, 2);

    let found = store.find_job(jobs[0].id).await.unwrap().unwrap();
    assert_eq!(found.stage, Stage::Ingested);
    assert_eq!(found.status, JobStatus::Queued);
    assert!(found.completions.contains(Stage::Ingested));

    let runnable = store.list_runnable(Some(batch.id), 10).await.unwrap();
    assert_eq!(runnable[0].output_name, "b");

    let counts = store.status_counts(batch.id).await.unwrap();
    assert_eq!(counts.queued, 2);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn payloads_round_trip_through_jsonb(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let (_, jobs) = store.create_batch("ana", &rows()).await.unwrap();
    let job = jobs[0].clone();

    let mut next = job.clone();
    next.stage = Stage::Extracted;
    next.completions.record(Stage::Extracted, SYSTEM_ACTOR, Utc::now());
    next.payloads.extraction = Some(ExtractionResult {
        elements: vec![SourceElement {
            name: "hero".into(),
            kind: ContentKind::Image,
            geometry: Some(Geometry::sized(1920.0, 1080.0)),
        }],
        slots: vec![TemplateSlot {
            name: "hero".into(),
            kind: ContentKind::Image,
            geometry: Some(Geometry::sized(1920.0, 1161.0)),
        }],
        source_canvas: Some(Canvas::new(1920.0, 1080.0)),
        template_canvas: None,
    });

    let entry = NewLogEntry {
        job_id: job.id,
        batch_id: job.batch_id,
        kind: TransitionKind::Advance,
        from_stage: Stage::Ingested,
        from_status: JobStatus::Queued,
        to_stage: Stage::Extracted,
        to_status: JobStatus::Queued,
        actor: SYSTEM_ACTOR.into(),
        message: None,
        error_category: None,
    };
    let saved = store.update_job(&next, 0, &[entry.clone()]).await.unwrap();
    assert_eq!(saved.version, 1);
    assert_eq!(saved.payloads.extraction, next.payloads.extraction);

    assert_matches!(
        store.update_job(&next, 0, &[entry.clone()]).await,
        Err(StoreError::VersionConflict { found: 1, .. })
    );

    let log = store.list_log(job.id, 10).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].to_stage, Stage::Extracted);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn warnings_and_archive(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let (batch, jobs) = store.create_batch("ana", &rows()).await.unwrap();

    store
        .append_warnings(
            jobs[0].id,
            &[NewWarning {
                stage: Stage::Validating,
                severity: IssueSeverity::Critical,
                category: "aspect-ratio-mismatch".into(),
                message: "distorted".into(),
            }],
        )
        .await
        .unwrap();
    assert_eq!(
        store
            .resolve_stage_warnings(jobs[0].id, Stage::Validating)
            .await
            .unwrap(),
        1
    );

    store.archive_batch(batch.id).await.unwrap().unwrap();
    assert!(store.list_runnable(Some(batch.id), 10).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "./migrations")]
#[ignore]
async fn warnings_share_the_job_update_transaction(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let (_, jobs) = store.create_batch("ana", &rows()).await.unwrap();
    let job = jobs[0].clone();

    let mut next = job.clone();
    next.status = JobStatus::Processing;
    let entry = NewLogEntry {
        job_id: job.id,
        batch_id: job.batch_id,
        kind: TransitionKind::Advance,
        from_stage: Stage::Ingested,
        from_status: JobStatus::Queued,
        to_stage: Stage::Ingested,
        to_status: JobStatus::Processing,
        actor: SYSTEM_ACTOR.into(),
        message: None,
        error_category: None,
    };
    let changes = WarningChanges {
        resolve_stages: vec![Stage::Extracted],
        append: vec![NewWarning {
            stage: Stage::Extracted,
            severity: IssueSeverity::Warning,
            category: "unfilled_slot".into(),
            message: "Slot 'cta' has no element".into(),
        }],
    };

    let (saved, created) = store
        .update_job_with_warnings(&next, 0, &[entry.clone()], &changes)
        .await
        .unwrap();
    assert_eq!(saved.version, 1);
    assert_eq!(created.len(), 1);

    assert_matches!(
        store
            .update_job_with_warnings(&next, 0, &[entry.clone()], &changes)
            .await,
        Err(StoreError::VersionConflict { found: 1, .. })
    );
    let all = store.list_warnings(job.id, true).await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(!all[0].resolved);
}
