//! Dispatcher runs against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use forma_core::collaborators::{
    CollaboratorError, Extractor, RenderOutcome, RenderRequest, Renderer,
};
use forma_core::content::{ContentKind, ExtractionResult, SourceElement, TemplateSlot};
use forma_core::error_category::ErrorCategory;
use forma_core::geometry::{Canvas, Geometry};
use forma_core::stages::{JobStatus, Stage};
use forma_db::models::batch::NewJobRow;
use forma_db::models::job::Job;
use forma_db::{JobStore, MemoryJobStore};
use forma_events::EventBus;
use forma_pipeline::{Orchestrator, PipelineSettings};
use forma_worker::JobDispatcher;

struct FixedExtractor(Result<ExtractionResult, CollaboratorError>);

#[async_trait]
impl Extractor for FixedExtractor {
    async fn extract(&self, _: &str, _: &str) -> Result<ExtractionResult, CollaboratorError> {
        self.0.clone()
    }
}

struct NoRender;

#[async_trait]
impl Renderer for NoRender {
    async fn render(&self, _: &RenderRequest) -> Result<RenderOutcome, CollaboratorError> {
        Err(CollaboratorError::Other("not expected".into()))
    }
}

fn extraction() -> ExtractionResult {
    ExtractionResult {
        elements: vec![SourceElement {
            name: "logo".into(),
            kind: ContentKind::Image,
            geometry: Some(Geometry::sized(400.0, 200.0)),
        }],
        slots: vec![TemplateSlot {
            name: "logo".into(),
            kind: ContentKind::Image,
            geometry: Some(Geometry::sized(400.0, 200.0)),
        }],
        source_canvas: Some(Canvas::new(1200.0, 628.0)),
        template_canvas: Some(Canvas::new(1200.0, 628.0)),
    }
}

async fn setup(
    extracted: Result<ExtractionResult, CollaboratorError>,
    jobs: usize,
) -> (Arc<MemoryJobStore>, JobDispatcher, i64) {
    let store = Arc::new(MemoryJobStore::new());
    let orchestrator = Orchestrator::new(
        Arc::clone(&store) as Arc<dyn JobStore>,
        Arc::new(EventBus::default()),
        Arc::new(FixedExtractor(extracted)) as Arc<dyn Extractor>,
        Arc::new(NoRender) as Arc<dyn Renderer>,
        PipelineSettings::default(),
    )
    .unwrap();

    let rows: Vec<NewJobRow> = (0..jobs)
        .map(|i| NewJobRow {
            source_path: format!("/in/social_{i}.psd"),
            template_path: "/tpl/social.indd".into(),
            output_name: format!("social_{i}"),
            priority: 0,
        })
        .collect();
    let created = orchestrator.create_batch(&rows, "ops").await.unwrap();

    let dispatcher = JobDispatcher::new(
        Arc::clone(&store) as Arc<dyn JobStore>,
        orchestrator.runner(),
        2,
        Duration::from_millis(10),
    );
    (store, dispatcher, created.batch.id)
}

/// Poll until no job in the batch is queued or processing.
async fn settled(store: &MemoryJobStore, batch_id: i64) -> Vec<Job> {
    for _ in 0..200 {
        let jobs = store.list_jobs_by_batch(batch_id).await.unwrap();
        if jobs
            .iter()
            .all(|j| !matches!(j.status, JobStatus::Queued | JobStatus::Processing))
        {
            return jobs;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("jobs did not settle");
}

#[tokio::test]
async fn dispatches_queued_jobs_to_matching_review() {
    let (store, dispatcher, batch_id) = setup(Ok(extraction()), 5).await;
    let dispatcher = Arc::new(dispatcher);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        let cancel = cancel.clone();
        async move { dispatcher.run(cancel).await }
    });

    let jobs = settled(&store, batch_id).await;
    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(jobs.len(), 5);
    for job in &jobs {
        assert_eq!(job.stage, Stage::MatchingReview);
        assert_eq!(job.status, JobStatus::AwaitingReview);
    }
    assert_eq!(dispatcher.in_flight(), 0);
}

#[tokio::test]
async fn collaborator_failure_is_recorded_on_the_job() {
    let (store, dispatcher, batch_id) =
        setup(Err(CollaboratorError::Timeout(30)), 1).await;

    assert_eq!(dispatcher.try_dispatch().await.unwrap(), 1);
    let jobs = settled(&store, batch_id).await;

    assert_eq!(jobs[0].stage, Stage::Ingested);
    assert_eq!(jobs[0].status, JobStatus::Error);
    assert_eq!(
        jobs[0].last_error.as_ref().unwrap().category,
        ErrorCategory::Timeout
    );
}

#[tokio::test]
async fn nothing_to_dispatch_when_no_job_is_runnable() {
    let (store, dispatcher, batch_id) = setup(Ok(extraction()), 1).await;
    dispatcher.try_dispatch().await.unwrap();
    settled(&store, batch_id).await;

    // The job now waits at a human gate.
    assert_eq!(dispatcher.try_dispatch().await.unwrap(), 0);
}
