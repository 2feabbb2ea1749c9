//! Validation issue and report types, plus the fixed thresholds.

use serde::{Deserialize, Serialize};

use crate::geometry::Geometry;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Relative aspect difference above which content is visibly distorted.
pub const ASPECT_RATIO_TOLERANCE: f64 = 0.10;

/// Upscale factor above which pixelation is severe.
pub const MAX_UPSCALE_FACTOR: f64 = 2.0;

/// Scale factors at or below this are downscales and always safe.
pub const SAFE_SCALE_FACTOR: f64 = 1.0;

// ---------------------------------------------------------------------------
// Issue types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueType {
    AspectRatioMismatch,
    ResolutionCritical,
    ResolutionWarning,
    DimensionMismatch,
}

impl IssueType {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueType::AspectRatioMismatch => "aspect-ratio-mismatch",
            IssueType::ResolutionCritical => "resolution-critical",
            IssueType::ResolutionWarning => "resolution-warning",
            IssueType::DimensionMismatch => "dimension-mismatch",
        }
    }
}

/// Severity shared by validation issues and job warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Critical,
    Warning,
    Info,
}

impl IssueSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueSeverity::Critical => "critical",
            IssueSeverity::Warning => "warning",
            IssueSeverity::Info => "info",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(IssueSeverity::Critical),
            "warning" => Some(IssueSeverity::Warning),
            "info" => Some(IssueSeverity::Info),
            _ => None,
        }
    }
}

/// The association an issue was raised against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSubject {
    pub element_index: usize,
    pub element_name: String,
    pub slot_index: usize,
    pub slot_name: String,
}

/// One detected conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub issue_type: IssueType,
    pub severity: IssueSeverity,
    /// `None` for the document-level dimension check.
    pub subject: Option<IssueSubject>,
    /// Relative aspect difference (fraction, not percent).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aspect_difference: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_factor: Option<f64>,
    pub message: String,
    pub remedy: String,
}

impl ValidationIssue {
    pub fn percent_difference(&self) -> Option<f64> {
        self.aspect_difference.map(|d| d * 100.0)
    }
}

/// Human decision to proceed despite critical issues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationOverride {
    pub reason: String,
    pub actor: String,
    pub at: Timestamp,
}

/// Stage-3 payload. Rebuilt from scratch on every validation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// True iff there are no critical issues.
    pub valid: bool,
    pub critical: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub info: Vec<ValidationIssue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub override_decision: Option<ValidationOverride>,
}

impl ValidationReport {
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        let mut critical = Vec::new();
        let mut warnings = Vec::new();
        let mut info = Vec::new();
        for issue in issues {
            match issue.severity {
                IssueSeverity::Critical => critical.push(issue),
                IssueSeverity::Warning => warnings.push(issue),
                IssueSeverity::Info => info.push(issue),
            }
        }
        Self {
            valid: critical.is_empty(),
            critical,
            warnings,
            info,
            override_decision: None,
        }
    }

    /// Generation may proceed: either valid or explicitly overridden.
    pub fn passes(&self) -> bool {
        self.valid || self.override_decision.is_some()
    }

    pub fn is_overridden(&self) -> bool {
        self.override_decision.is_some()
    }

    pub fn issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.critical
            .iter()
            .chain(self.warnings.iter())
            .chain(self.info.iter())
    }

    pub fn issue_count(&self) -> usize {
        self.critical.len() + self.warnings.len() + self.info.len()
    }
}

/// Resolved geometry behind one approved association.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryPair {
    pub subject: IssueSubject,
    pub source: Geometry,
    pub target: Geometry,
}
