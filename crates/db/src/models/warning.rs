//! Job warnings produced by matching and validation.

use serde::Serialize;

use forma_core::stages::Stage;
use forma_core::types::{DbId, Timestamp};
use forma_core::validation::IssueSeverity;

/// Warning categories emitted by the matching step.
pub const CATEGORY_UNFILLED_SLOT: &str = "unfilled_slot";
pub const CATEGORY_UNMATCHED_ELEMENT: &str = "unmatched_element";
pub const CATEGORY_LOW_CONFIDENCE: &str = "low_confidence";

/// A row from the `job_warnings` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobWarning {
    pub id: DbId,
    pub job_id: DbId,
    pub stage: Stage,
    pub severity: IssueSeverity,
    pub category: String,
    pub message: String,
    pub resolved: bool,
    pub resolved_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

/// Input for appending a warning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWarning {
    pub stage: Stage,
    pub severity: IssueSeverity,
    pub category: String,
    pub message: String,
}

/// Warning writes applied in the same unit of work as a job update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WarningChanges {
    /// Stages whose open warnings for the job are resolved first.
    pub resolve_stages: Vec<Stage>,
    pub append: Vec<NewWarning>,
}

impl WarningChanges {
    pub fn is_empty(&self) -> bool {
        self.resolve_stages.is_empty() && self.append.is_empty()
    }
}
