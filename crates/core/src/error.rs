use crate::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: DbId },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// A transition precondition does not hold for the job's current state.
    #[error("Guard violation: {0}")]
    Guard(String),

    /// Stored state changed between read and write.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Input data is structurally incomplete (e.g. missing geometry).
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable, machine-readable category for callers.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::Guard(_) => "GUARD_VIOLATION",
            CoreError::Conflict(_) => "CONFLICT",
            CoreError::DataIntegrity(_) => "DATA_INTEGRITY",
            CoreError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
