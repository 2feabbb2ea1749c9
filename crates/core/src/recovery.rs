//! Resume-point detection, named checkpoints and failure diagnosis.
//!
//! All functions here are pure: they look at a job's stored payloads and
//! error record and decide where a restart should begin. Applying the
//! decision is the job of the recovery service in `forma-pipeline`.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::error_category::ErrorCategory;
use crate::payloads::{ErrorRecord, StagePayloads};
use crate::stages::Stage;

/// Stages an explicit retry may name.
pub const RETRY_STAGES: [Stage; 3] = [Stage::Extracted, Stage::Validating, Stage::Generating];

// ---------------------------------------------------------------------------
// Resume detection
// ---------------------------------------------------------------------------

/// Latest stage whose inputs are already present and usable.
///
/// A current approval plus a passing (or overridden) report resumes at
/// generation; a current approval alone resumes at validation; anything
/// else restarts extraction.
pub fn detect_resume_stage(payloads: &StagePayloads) -> Stage {
    match payloads.current_approval() {
        Some(_) if payloads.validation_passes() => Stage::Generating,
        Some(_) if payloads.extraction.is_some() => Stage::Validating,
        _ => Stage::Extracted,
    }
}

/// Where a retry without an explicit stage re-enters: the detected resume
/// stage, but never past the stage the job failed at.
pub fn restart_stage(payloads: &StagePayloads, failed_stage: Stage) -> Stage {
    detect_resume_stage(payloads).min(failed_stage)
}

/// Check an explicitly requested retry stage.
pub fn check_retry_stage(stage: Stage, payloads: &StagePayloads) -> Result<(), CoreError> {
    if !RETRY_STAGES.contains(&stage) {
        return Err(CoreError::Validation(format!(
            "Retry stage must be one of extracted, validating, generating; got '{stage}'"
        )));
    }
    check_prerequisites(stage, payloads)
}

fn check_prerequisites(stage: Stage, payloads: &StagePayloads) -> Result<(), CoreError> {
    if stage >= Stage::Validating {
        if payloads.extraction.is_none() {
            return Err(CoreError::Guard(format!(
                "Cannot resume at '{stage}': no extraction result is stored"
            )));
        }
        if payloads.current_approval().is_none() {
            return Err(CoreError::Guard(format!(
                "Cannot resume at '{stage}': no current approved associations"
            )));
        }
    }
    if stage >= Stage::Generating && !payloads.validation_passes() {
        return Err(CoreError::Guard(format!(
            "Cannot resume at '{stage}': no passing or overridden validation result"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

/// Named reset points for a human-directed clean restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Checkpoint {
    /// Back to ingestion, nothing kept.
    Initial,
    /// Keep extraction and approval, redo validation.
    Matched,
    /// Keep validation, redo generation.
    Validated,
}

impl Checkpoint {
    pub fn parse(name: &str) -> Result<Self, CoreError> {
        match name {
            "initial" => Ok(Checkpoint::Initial),
            "matched" => Ok(Checkpoint::Matched),
            "validated" => Ok(Checkpoint::Validated),
            other => Err(CoreError::Validation(format!(
                "Unknown checkpoint '{other}'. Expected one of: initial, matched, validated"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Checkpoint::Initial => "initial",
            Checkpoint::Matched => "matched",
            Checkpoint::Validated => "validated",
        }
    }

    /// Stage the job re-enters at.
    pub fn stage(self) -> Stage {
        match self {
            Checkpoint::Initial => Stage::Ingested,
            Checkpoint::Matched => Stage::Validating,
            Checkpoint::Validated => Stage::Generating,
        }
    }

    /// Fail when the payloads the checkpoint keeps are not stored.
    pub fn check_available(self, payloads: &StagePayloads) -> Result<(), CoreError> {
        check_prerequisites(self.stage(), payloads)
    }
}

// ---------------------------------------------------------------------------
// Diagnosis
// ---------------------------------------------------------------------------

/// Read-only analysis of a failed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnosis {
    pub category: ErrorCategory,
    pub failed_stage: Stage,
    pub message: String,
    pub possible_causes: Vec<String>,
    pub suggested_fixes: Vec<String>,
    pub retry_possible: bool,
    pub retry_recommended: bool,
    pub restart_stage: Stage,
}

/// Classify an error record and pick the restart stage.
///
/// The error text is classified first; the stored category is used when
/// the text alone gives no answer.
pub fn diagnose(error: &ErrorRecord, payloads: &StagePayloads) -> Diagnosis {
    let category = match ErrorCategory::classify(&error.message) {
        ErrorCategory::Unknown => error.category,
        c => c,
    };
    Diagnosis {
        category,
        failed_stage: error.stage,
        message: error.message.clone(),
        possible_causes: category
            .possible_causes()
            .iter()
            .map(|s| s.to_string())
            .collect(),
        suggested_fixes: category
            .suggested_fixes()
            .iter()
            .map(|s| s.to_string())
            .collect(),
        retry_possible: category.retry_possible(),
        retry_recommended: category.retry_recommended(),
        restart_stage: restart_stage(payloads, error.stage),
    }
}
