use forma_core::error::CoreError;
use forma_db::StoreError;

/// Error returned by every pipeline operation.
///
/// Wraps [`CoreError`] for rejected operations and [`StoreError`] for
/// persistence failures. [`PipelineError::code`] gives the stable category a
/// transport would put on the wire.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Core(core) => core.code(),
            PipelineError::Store(store) => match store {
                StoreError::NotFound { .. } => "NOT_FOUND",
                StoreError::VersionConflict { .. } => "CONFLICT",
                StoreError::Database(_) => "DATABASE_ERROR",
                StoreError::Codec(_) => "DATA_INTEGRITY",
            },
        }
    }

    /// Someone else wrote the job between our read and our write.
    pub fn is_conflict(&self) -> bool {
        match self {
            PipelineError::Core(CoreError::Conflict(_)) => true,
            PipelineError::Store(store) => store.is_conflict(),
            _ => false,
        }
    }

    pub(crate) fn guard(message: impl Into<String>) -> Self {
        PipelineError::Core(CoreError::Guard(message.into()))
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        PipelineError::Core(CoreError::Validation(message.into()))
    }

    pub(crate) fn not_found(entity: &'static str, id: forma_core::types::DbId) -> Self {
        PipelineError::Core(CoreError::NotFound { entity, id })
    }
}
