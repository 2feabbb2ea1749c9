//! Repository for the `job_warnings` table.

use sqlx::{FromRow, PgConnection, PgPool};

use forma_core::stages::Stage;
use forma_core::types::{DbId, Timestamp};
use forma_core::validation::IssueSeverity;

use crate::error::StoreError;
use crate::models::warning::{JobWarning, NewWarning};
use crate::repositories::decode_stage;

/// Column list for `job_warnings` queries.
const COLUMNS: &str = "\
    id, job_id, stage_id, severity, category, message, resolved, resolved_at, created_at";

#[derive(FromRow)]
struct WarningRow {
    id: DbId,
    job_id: DbId,
    stage_id: i16,
    severity: String,
    category: String,
    message: String,
    resolved: bool,
    resolved_at: Option<Timestamp>,
    created_at: Timestamp,
}

impl TryFrom<WarningRow> for JobWarning {
    type Error = StoreError;

    fn try_from(row: WarningRow) -> Result<Self, Self::Error> {
        let severity = IssueSeverity::parse(&row.severity)
            .ok_or_else(|| StoreError::Codec(format!("unknown severity '{}'", row.severity)))?;
        Ok(JobWarning {
            id: row.id,
            job_id: row.job_id,
            stage: decode_stage(row.stage_id)?,
            severity,
            category: row.category,
            message: row.message,
            resolved: row.resolved,
            resolved_at: row.resolved_at,
            created_at: row.created_at,
        })
    }
}

/// Provides append/list/resolve operations for job warnings.
pub struct WarningRepo;

impl WarningRepo {
    /// Insert on `conn`; the caller owns the transaction.
    pub async fn insert_many(
        conn: &mut PgConnection,
        job_id: DbId,
        warnings: &[NewWarning],
    ) -> Result<Vec<JobWarning>, StoreError> {
        if warnings.is_empty() {
            return Ok(Vec::new());
        }

        let query = format!(
            "INSERT INTO job_warnings (job_id, stage_id, severity, category, message) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );

        let mut results = Vec::with_capacity(warnings.len());
        for w in warnings {
            let row = sqlx::query_as::<_, WarningRow>(&query)
                .bind(job_id)
                .bind(w.stage.id())
                .bind(w.severity.as_str())
                .bind(&w.category)
                .bind(&w.message)
                .fetch_one(&mut *conn)
                .await?;
            results.push(JobWarning::try_from(row)?);
        }
        Ok(results)
    }

    pub async fn list_by_job(
        pool: &PgPool,
        job_id: DbId,
        include_resolved: bool,
    ) -> Result<Vec<JobWarning>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM job_warnings \
             WHERE job_id = $1 AND ($2 OR NOT resolved) \
             ORDER BY id ASC"
        );
        sqlx::query_as::<_, WarningRow>(&query)
            .bind(job_id)
            .bind(include_resolved)
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(JobWarning::try_from)
            .collect()
    }

    /// Resolve every open warning a stage produced for a job.
    pub async fn resolve_for_stage(
        conn: &mut PgConnection,
        job_id: DbId,
        stage: Stage,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE job_warnings SET resolved = TRUE, resolved_at = NOW() \
             WHERE job_id = $1 AND stage_id = $2 AND NOT resolved",
        )
        .bind(job_id)
        .bind(stage.id())
        .execute(conn)
        .await?;
        Ok(result.rows_affected())
    }

    /// Resolve one warning. Resolving an already-resolved warning keeps
    /// its original `resolved_at`.
    pub async fn resolve(pool: &PgPool, id: DbId) -> Result<Option<JobWarning>, StoreError> {
        let query = format!(
            "UPDATE job_warnings \
             SET resolved = TRUE, resolved_at = COALESCE(resolved_at, NOW()) \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WarningRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .map(JobWarning::try_from)
            .transpose()
    }
}
