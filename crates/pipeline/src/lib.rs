//! Orchestration services for the forma job pipeline.
//!
//! - [`StageTransitionManager`]: the guarded state machine; every job write
//!   outside recovery goes through it.
//! - [`StageRunner`]: runs the automated work of a job's current stage and
//!   turns failures into stored error records.
//! - [`RecoveryService`]: diagnosis, retries, checkpoint resets, stats.
//! - [`Orchestrator`]: the operations a transport exposes, wired together.

pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod runner;
pub mod transitions;

pub use error::{PipelineError, PipelineResult};
pub use orchestrator::{
    CreatedBatch, JobDetail, Orchestrator, PipelineSettings, RowError, RunOutcome,
};
pub use recovery::{BulkRetryReport, RecoveryService, RecoveryStats, RetryOutcome, RetryTarget};
pub use runner::StageRunner;
pub use transitions::{StageTransitionManager, TransitionOutcome};
