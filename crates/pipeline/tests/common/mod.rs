#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use forma_core::collaborators::{
    CollaboratorError, Extractor, RenderOutcome, RenderRequest, Renderer,
};
use forma_core::content::{ContentKind, ExtractionResult, SourceElement, TemplateSlot};
use forma_core::geometry::{Canvas, Geometry};
use forma_core::stages::{JobStatus, Stage};
use forma_db::models::batch::NewJobRow;
use forma_db::models::job::Job;
use forma_db::{JobStore, MemoryJobStore};
use forma_events::EventBus;
use forma_pipeline::{Orchestrator, PipelineSettings};

pub const REVIEWER: &str = "ana";

// ---------------------------------------------------------------------------
// Fake collaborators
// ---------------------------------------------------------------------------

/// Returns a fixed extraction, after draining any queued failures.
pub struct FakeExtractor {
    extraction: ExtractionResult,
    failures: Mutex<VecDeque<CollaboratorError>>,
    calls: AtomicUsize,
}

impl FakeExtractor {
    pub fn new(extraction: ExtractionResult) -> Self {
        Self {
            extraction,
            failures: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_next(&self, err: CollaboratorError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn extract(
        &self,
        _source_path: &str,
        _template_path: &str,
    ) -> Result<ExtractionResult, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(self.extraction.clone())
    }
}

/// Renders `/out/<output_name>.png`, after draining any queued failures.
#[derive(Default)]
pub struct FakeRenderer {
    failures: Mutex<VecDeque<CollaboratorError>>,
    calls: AtomicUsize,
}

impl FakeRenderer {
    pub fn fail_next(&self, err: CollaboratorError) {
        self.failures.lock().unwrap().push_back(err);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutcome, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(RenderOutcome {
            success: true,
            artifact_path: Some(format!("/out/{}.png", request.output_name)),
            message: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// One image element and one image slot, both named "hero", with the given
/// sizes; the canvases carry the same sizes.
pub fn hero_extraction(source: (f64, f64), slot: (f64, f64)) -> ExtractionResult {
    ExtractionResult {
        elements: vec![SourceElement {
            name: "hero".into(),
            kind: ContentKind::Image,
            geometry: Some(Geometry::sized(source.0, source.1)),
        }],
        slots: vec![TemplateSlot {
            name: "hero".into(),
            kind: ContentKind::Image,
            geometry: Some(Geometry::sized(slot.0, slot.1)),
        }],
        source_canvas: Some(Canvas::new(source.0, source.1)),
        template_canvas: Some(Canvas::new(slot.0, slot.1)),
    }
}

/// Source 1920x1080 against a 1920x1161 slot: within tolerance.
pub fn passing_extraction() -> ExtractionResult {
    hero_extraction((1920.0, 1080.0), (1920.0, 1161.0))
}

/// Source 1920x1080 against a square slot: visibly distorted.
pub fn distorted_extraction() -> ExtractionResult {
    hero_extraction((1920.0, 1080.0), (1920.0, 1920.0))
}

pub fn rows(n: usize) -> Vec<NewJobRow> {
    (0..n)
        .map(|i| NewJobRow {
            source_path: format!("/in/campaign_{i}.psd"),
            template_path: "/tpl/leaderboard.indd".into(),
            output_name: format!("leaderboard_{i}"),
            priority: 0,
        })
        .collect()
}

pub struct Harness {
    pub store: Arc<MemoryJobStore>,
    pub bus: Arc<EventBus>,
    pub extractor: Arc<FakeExtractor>,
    pub renderer: Arc<FakeRenderer>,
    pub orchestrator: Orchestrator,
}

pub fn harness(extraction: ExtractionResult) -> Harness {
    harness_with(extraction, PipelineSettings::default())
}

pub fn harness_with(extraction: ExtractionResult, settings: PipelineSettings) -> Harness {
    let store = Arc::new(MemoryJobStore::new());
    let bus = Arc::new(EventBus::default());
    let extractor = Arc::new(FakeExtractor::new(extraction));
    let renderer = Arc::new(FakeRenderer::default());
    let orchestrator = Orchestrator::new(
        Arc::clone(&store) as Arc<dyn JobStore>,
        Arc::clone(&bus),
        Arc::clone(&extractor) as Arc<dyn Extractor>,
        Arc::clone(&renderer) as Arc<dyn Renderer>,
        settings,
    )
    .unwrap();
    Harness {
        store,
        bus,
        extractor,
        renderer,
        orchestrator,
    }
}

impl Harness {
    /// Create a batch of `n` jobs and run them to matching review.
    pub async fn batch_at_matching_review(&self, n: usize) -> (i64, Vec<Job>) {
        let created = self
            .orchestrator
            .create_batch(&rows(n), REVIEWER)
            .await
            .unwrap();
        let batch_id = created.batch.id;
        self.orchestrator
            .start_processing(batch_id, None)
            .await
            .unwrap();

        let mut jobs = self.store.list_jobs_by_batch(batch_id).await.unwrap();
        jobs.sort_by_key(|j| j.id);
        for job in &jobs {
            assert_eq!(job.stage, Stage::MatchingReview);
            assert_eq!(job.status, JobStatus::AwaitingReview);
        }
        (batch_id, jobs)
    }

    /// One job at matching review.
    pub async fn job_at_matching_review(&self) -> Job {
        let (_, mut jobs) = self.batch_at_matching_review(1).await;
        jobs.remove(0)
    }

    /// Approve exactly what matching proposed.
    pub async fn approve_proposed(&self, job: &Job) -> forma_pipeline::TransitionOutcome {
        let proposed = job.payloads.proposed.clone().unwrap().associations;
        self.orchestrator
            .approve_matching(job.id, REVIEWER, proposed)
            .await
            .unwrap()
    }

    pub async fn job(&self, job_id: i64) -> Job {
        self.store.find_job(job_id).await.unwrap().unwrap()
    }
}
