//! Geometry validation engine.
//!
//! Issue and report types live in [`rules`]; the pure-logic checks in
//! [`evaluator`]. Nothing here touches the database.

pub mod evaluator;
pub mod rules;

pub use evaluator::{ValidationEngine, ValidationInput};
pub use rules::{
    GeometryPair, IssueSeverity, IssueSubject, IssueType, ValidationIssue, ValidationOverride,
    ValidationReport,
};
