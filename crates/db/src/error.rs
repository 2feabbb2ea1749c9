use forma_core::types::DbId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: DbId },

    /// The job was written by someone else between read and write.
    #[error("Job {job_id} was modified concurrently (expected version {expected}, found {found})")]
    VersionConflict {
        job_id: DbId,
        expected: i64,
        found: i64,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be decoded into its domain type.
    #[error("Corrupt stored value: {0}")]
    Codec(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::VersionConflict { .. })
    }
}
