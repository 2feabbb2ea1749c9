//! Event bus backed by a `tokio::sync::broadcast` channel.
//!
//! Shared as `Arc<EventBus>` between the pipeline services and whoever
//! wants to observe them (the worker logs every event).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use forma_core::stages::{JobStatus, Stage};
use forma_core::types::DbId;

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

pub const JOB_TRANSITIONED: &str = "job.transitioned";
pub const JOB_FAILED: &str = "job.failed";
pub const JOB_RETRIED: &str = "job.retried";
pub const BATCH_CREATED: &str = "batch.created";

// ---------------------------------------------------------------------------
// PipelineEvent
// ---------------------------------------------------------------------------

/// Something that happened to a job or batch.
///
/// Built with [`PipelineEvent::new`] and the `with_*` builder methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// Dot-separated event name, e.g. `"job.transitioned"`.
    pub event_type: String,
    pub batch_id: Option<DbId>,
    pub job_id: Option<DbId>,
    /// Stage/status the job ended up in.
    pub stage: Option<Stage>,
    pub status: Option<JobStatus>,
    pub actor: Option<String>,
    /// Event-specific data.
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            batch_id: None,
            job_id: None,
            stage: None,
            status: None,
            actor: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_job(mut self, batch_id: DbId, job_id: DbId) -> Self {
        self.batch_id = Some(batch_id);
        self.job_id = Some(job_id);
        self
    }

    pub fn with_batch(mut self, batch_id: DbId) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_state(mut self, stage: Stage, status: JobStatus) -> Self {
        self.stage = Some(stage);
        self.status = Some(status);
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out bus. Slow receivers observe `RecvError::Lagged`.
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped if there are none.
    pub fn publish(&self, event: PipelineEvent) {
        // SendError only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
