//! Typed per-stage result payloads and per-stage completion records.
//!
//! Each payload is persisted whole as one JSONB column; see `forma-db`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::content::ExtractionResult;
use crate::error_category::ErrorCategory;
use crate::matching::{Association, MatchingResult};
use crate::stages::Stage;
use crate::types::Timestamp;
use crate::validation::ValidationReport;

/// Stage-2 payload: the human-approved association set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovedMatches {
    pub associations: Vec<Association>,
    pub approved_by: String,
    pub approved_at: Timestamp,
    /// Set when the job was rolled back to matching review. A stale approval
    /// is kept for reference but is never used as a resume point.
    #[serde(default)]
    pub stale: bool,
}

impl ApprovedMatches {
    pub fn is_current(&self) -> bool {
        !self.stale && !self.associations.is_empty()
    }
}

/// Stage-4 payload: what the render collaborator produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub artifact_path: String,
    pub rendered_at: Timestamp,
}

/// Who completed a stage and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCompletion {
    pub at: Timestamp,
    pub by: String,
    /// The stage was bypassed (validation review after a passing run).
    #[serde(default)]
    pub skipped: bool,
}

/// Completion records keyed by stage. A record exists for every stage at
/// or before the job's current stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageCompletions(BTreeMap<Stage, StageCompletion>);

impl StageCompletions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, stage: Stage, by: &str, at: Timestamp) {
        self.0.insert(
            stage,
            StageCompletion {
                at,
                by: by.to_string(),
                skipped: false,
            },
        );
    }

    pub fn record_skipped(&mut self, stage: Stage, by: &str, at: Timestamp) {
        self.0.insert(
            stage,
            StageCompletion {
                at,
                by: by.to_string(),
                skipped: true,
            },
        );
    }

    /// Drop every record for stages later than `stage`.
    pub fn truncate_after(&mut self, stage: Stage) {
        self.0.retain(|s, _| *s <= stage);
    }

    pub fn get(&self, stage: Stage) -> Option<&StageCompletion> {
        self.0.get(&stage)
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.0.contains_key(&stage)
    }

    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.0.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// All result payloads a job can carry, one slot per producing stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagePayloads {
    /// Extracted.
    pub extraction: Option<ExtractionResult>,
    /// Extracted.
    pub proposed: Option<MatchingResult>,
    /// MatchingReview.
    pub approved: Option<ApprovedMatches>,
    /// Validating.
    pub validation: Option<ValidationReport>,
    /// Generating.
    pub artifact: Option<GeneratedArtifact>,
}

impl StagePayloads {
    /// Clear every payload produced at or after `stage`.
    pub fn clear_from(&mut self, stage: Stage) {
        if stage <= Stage::Extracted {
            self.extraction = None;
            self.proposed = None;
        }
        if stage <= Stage::MatchingReview {
            self.approved = None;
        }
        if stage <= Stage::Validating {
            self.validation = None;
        }
        if stage <= Stage::Generating {
            self.artifact = None;
        }
    }

    /// The approval, unless it is missing, empty or stale.
    pub fn current_approval(&self) -> Option<&ApprovedMatches> {
        self.approved.as_ref().filter(|a| a.is_current())
    }

    /// A validation report exists and is valid or overridden.
    pub fn validation_passes(&self) -> bool {
        self.validation.as_ref().is_some_and(ValidationReport::passes)
    }
}

/// Structured record of the last failure of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub stage: Stage,
    pub category: ErrorCategory,
    pub message: String,
    pub at: Timestamp,
}
