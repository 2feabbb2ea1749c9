//! Repository structs: one per table, runtime-built queries against a
//! column-list constant, decoding into domain types at the boundary.

pub mod batch_repo;
pub mod job_log_repo;
pub mod job_repo;
pub mod warning_repo;

pub use batch_repo::BatchRepo;
pub use job_log_repo::JobLogRepo;
pub use job_repo::JobRepo;
pub use warning_repo::WarningRepo;

use forma_core::stages::{JobStatus, Stage, StageId};

use crate::error::StoreError;

pub(crate) fn decode_stage(id: StageId) -> Result<Stage, StoreError> {
    Stage::from_id(id).ok_or_else(|| StoreError::Codec(format!("unknown stage_id {id}")))
}

pub(crate) fn decode_status(id: StageId) -> Result<JobStatus, StoreError> {
    JobStatus::from_id(id).ok_or_else(|| StoreError::Codec(format!("unknown status_id {id}")))
}
