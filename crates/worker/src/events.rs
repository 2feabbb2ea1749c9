//! Writes every pipeline event to the log.

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use forma_events::bus::{JOB_FAILED, JOB_RETRIED};
use forma_events::PipelineEvent;

pub struct EventLogger;

impl EventLogger {
    /// Log events until the bus closes or `cancel` fires. Returns how many
    /// events were seen.
    pub async fn run(
        mut receiver: broadcast::Receiver<PipelineEvent>,
        cancel: CancellationToken,
    ) -> usize {
        let mut seen = 0;
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = receiver.recv() => received,
            };
            match received {
                Ok(event) => {
                    seen += 1;
                    Self::log(&event);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event logger lagged, some events were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, event logger shutting down");
                    break;
                }
            }
        }
        seen
    }

    fn log(event: &PipelineEvent) {
        match event.event_type.as_str() {
            JOB_FAILED | JOB_RETRIED => tracing::warn!(
                event_type = %event.event_type,
                batch_id = event.batch_id,
                job_id = event.job_id,
                stage = ?event.stage,
                status = ?event.status,
                actor = event.actor.as_deref(),
                payload = %event.payload,
                "Pipeline event",
            ),
            _ => tracing::debug!(
                event_type = %event.event_type,
                batch_id = event.batch_id,
                job_id = event.job_id,
                stage = ?event.stage,
                status = ?event.status,
                actor = event.actor.as_deref(),
                payload = %event.payload,
                "Pipeline event",
            ),
        }
    }
}
