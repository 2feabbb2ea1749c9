//! Geometry checks: pure logic, no database access.

use crate::content::ExtractionResult;
use crate::error::CoreError;
use crate::geometry::{aspect_difference, max_scale, Canvas};
use crate::matching::Association;

use super::rules::{
    GeometryPair, IssueSeverity, IssueSubject, IssueType, ValidationIssue, ValidationReport,
    ASPECT_RATIO_TOLERANCE, MAX_UPSCALE_FACTOR, SAFE_SCALE_FACTOR,
};

/// Everything the engine looks at, already resolved and checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationInput {
    pub pairs: Vec<GeometryPair>,
    pub source_canvas: Option<Canvas>,
    pub template_canvas: Option<Canvas>,
}

impl ValidationInput {
    /// Resolve approved associations against the extraction payload.
    ///
    /// Unknown element/slot references, missing geometry and non-positive
    /// dimensions are data-integrity errors.
    pub fn build(
        associations: &[Association],
        extraction: &ExtractionResult,
    ) -> Result<Self, CoreError> {
        let mut pairs = Vec::with_capacity(associations.len());

        for a in associations {
            let element = extraction.element(a.element_index).ok_or_else(|| {
                CoreError::DataIntegrity(format!(
                    "association refers to unknown element {} ('{}')",
                    a.element_index, a.element_name
                ))
            })?;
            let slot = extraction.slot(a.slot_index).ok_or_else(|| {
                CoreError::DataIntegrity(format!(
                    "association refers to unknown slot {} ('{}')",
                    a.slot_index, a.slot_name
                ))
            })?;

            let source = element.geometry.ok_or_else(|| {
                CoreError::DataIntegrity(format!("element '{}' has no geometry", element.name))
            })?;
            let target = slot.geometry.ok_or_else(|| {
                CoreError::DataIntegrity(format!("slot '{}' has no geometry", slot.name))
            })?;
            source.ensure_measurable(&format!("element '{}'", element.name))?;
            target.ensure_measurable(&format!("slot '{}'", slot.name))?;

            pairs.push(GeometryPair {
                subject: IssueSubject {
                    element_index: a.element_index,
                    element_name: element.name.clone(),
                    slot_index: a.slot_index,
                    slot_name: slot.name.clone(),
                },
                source,
                target,
            });
        }

        if let Some(c) = &extraction.source_canvas {
            c.ensure_measurable("source canvas")?;
        }
        if let Some(c) = &extraction.template_canvas {
            c.ensure_measurable("template canvas")?;
        }

        Ok(Self {
            pairs,
            source_canvas: extraction.source_canvas,
            template_canvas: extraction.template_canvas,
        })
    }
}

/// Stateless, deterministic geometry validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationEngine;

impl ValidationEngine {
    pub fn new() -> Self {
        Self
    }

    /// Resolve and validate in one step.
    pub fn validate_associations(
        &self,
        associations: &[Association],
        extraction: &ExtractionResult,
    ) -> Result<ValidationReport, CoreError> {
        let input = ValidationInput::build(associations, extraction)?;
        Ok(self.validate(&input))
    }

    /// Run every check. The same input always yields the same report.
    pub fn validate(&self, input: &ValidationInput) -> ValidationReport {
        let mut issues = Vec::new();

        for pair in &input.pairs {
            if let Some(issue) = check_aspect(pair) {
                issues.push(issue);
            }
            if let Some(issue) = check_resolution(pair) {
                issues.push(issue);
            }
        }

        if let (Some(source), Some(template)) = (&input.source_canvas, &input.template_canvas) {
            if let Some(issue) = check_canvas(source, template) {
                issues.push(issue);
            }
        }

        let report = ValidationReport::from_issues(issues);
        tracing::debug!(
            pairs = input.pairs.len(),
            critical = report.critical.len(),
            warnings = report.warnings.len(),
            info = report.info.len(),
            "Validation run complete",
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

fn check_aspect(pair: &GeometryPair) -> Option<ValidationIssue> {
    let diff = aspect_difference(pair.source.aspect_ratio(), pair.target.aspect_ratio());
    if diff <= ASPECT_RATIO_TOLERANCE {
        return None;
    }
    Some(ValidationIssue {
        issue_type: IssueType::AspectRatioMismatch,
        severity: IssueSeverity::Critical,
        subject: Some(pair.subject.clone()),
        aspect_difference: Some(diff),
        scale_factor: None,
        message: format!(
            "'{}' in slot '{}': aspect ratios differ by {:.1}%, content will be visibly distorted",
            pair.subject.element_name,
            pair.subject.slot_name,
            diff * 100.0
        ),
        remedy: "Use a source asset closer to the slot's proportions or crop it to fit".into(),
    })
}

fn check_resolution(pair: &GeometryPair) -> Option<ValidationIssue> {
    let scale = max_scale(
        pair.source.width,
        pair.source.height,
        pair.target.width,
        pair.target.height,
    );
    if scale <= SAFE_SCALE_FACTOR {
        return None;
    }

    let (issue_type, severity, message, remedy) = if scale > MAX_UPSCALE_FACTOR {
        (
            IssueType::ResolutionCritical,
            IssueSeverity::Critical,
            format!(
                "'{}' must be upscaled {:.2}x to fill '{}', severe pixelation expected",
                pair.subject.element_name, scale, pair.subject.slot_name
            ),
            "Supply a higher-resolution source asset",
        )
    } else {
        (
            IssueType::ResolutionWarning,
            IssueSeverity::Warning,
            format!(
                "'{}' must be upscaled {:.2}x to fill '{}', quality may degrade",
                pair.subject.element_name, scale, pair.subject.slot_name
            ),
            "Consider a higher-resolution source asset",
        )
    };

    Some(ValidationIssue {
        issue_type,
        severity,
        subject: Some(pair.subject.clone()),
        aspect_difference: None,
        scale_factor: Some(scale),
        message,
        remedy: remedy.into(),
    })
}

fn check_canvas(source: &Canvas, template: &Canvas) -> Option<ValidationIssue> {
    if source.width == template.width && source.height == template.height {
        return None;
    }
    let diff = aspect_difference(source.aspect_ratio(), template.aspect_ratio());
    let severity = if diff > ASPECT_RATIO_TOLERANCE {
        IssueSeverity::Warning
    } else {
        IssueSeverity::Info
    };
    Some(ValidationIssue {
        issue_type: IssueType::DimensionMismatch,
        severity,
        subject: None,
        aspect_difference: Some(diff),
        scale_factor: None,
        message: format!(
            "Source canvas {}x{} differs from template canvas {}x{} ({:.1}% aspect difference)",
            source.width,
            source.height,
            template.width,
            template.height,
            diff * 100.0
        ),
        remedy: "Confirm the template size is intended for this source".into(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
