//! Seams to the external services the pipeline depends on.
//!
//! The extraction collaborator turns a design source and template into an
//! [`ExtractionResult`]; the render collaborator composes the final artifact.
//! HTTP implementations live in `forma-collab`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::content::ExtractionResult;
use crate::error_category::ErrorCategory;
use crate::matching::Association;

/// Failure reported by a collaborator.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollaboratorError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Malformed input: {0}")]
    Malformed(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Out of memory: {0}")]
    ResourceExhausted(String),

    #[error("{0}")]
    Other(String),
}

impl CollaboratorError {
    /// Category to record when this error ends a stage.
    pub fn category(&self) -> ErrorCategory {
        match self {
            CollaboratorError::NotFound(_) => ErrorCategory::FileNotFound,
            CollaboratorError::Malformed(_) => ErrorCategory::ParsingError,
            CollaboratorError::Timeout(_) => ErrorCategory::Timeout,
            CollaboratorError::ResourceExhausted(_) => ErrorCategory::MemoryError,
            CollaboratorError::Other(msg) => ErrorCategory::classify(msg),
        }
    }
}

/// Input to the render collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub associations: Vec<Association>,
    pub template_path: String,
    pub output_name: String,
}

/// What the render collaborator reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOutcome {
    pub success: bool,
    pub artifact_path: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(
        &self,
        source_path: &str,
        template_path: &str,
    ) -> Result<ExtractionResult, CollaboratorError>;
}

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, request: &RenderRequest) -> Result<RenderOutcome, CollaboratorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_errors_map_to_categories() {
        assert_eq!(
            CollaboratorError::NotFound("a.psd".into()).category(),
            ErrorCategory::FileNotFound
        );
        assert_eq!(CollaboratorError::Timeout(30).category(), ErrorCategory::Timeout);
        assert_eq!(
            CollaboratorError::Other("out of memory".into()).category(),
            ErrorCategory::MemoryError
        );
        assert_eq!(
            CollaboratorError::Other("exit 1".into()).category(),
            ErrorCategory::Unknown
        );
    }
}
