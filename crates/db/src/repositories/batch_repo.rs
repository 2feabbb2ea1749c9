//! Repository for the `batches` table.

use sqlx::PgPool;

use forma_core::types::DbId;

use crate::error::StoreError;
use crate::models::batch::{Batch, NewJobRow, StatusCounts};
use crate::models::job::Job;
use crate::repositories::{decode_status, JobRepo};

/// Column list for `batches` queries.
const COLUMNS: &str = "id, row_count, uploaded_by, archived_at, created_at, updated_at";

/// Provides create/read/archive operations for batches.
pub struct BatchRepo;

impl BatchRepo {
    /// Insert a batch and one job per row in a single transaction.
    pub async fn create_with_jobs(
        pool: &PgPool,
        uploaded_by: &str,
        rows: &[NewJobRow],
    ) -> Result<(Batch, Vec<Job>), StoreError> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "INSERT INTO batches (row_count, uploaded_by) VALUES ($1, $2) RETURNING {COLUMNS}"
        );
        let batch = sqlx::query_as::<_, Batch>(&query)
            .bind(rows.len() as i32)
            .bind(uploaded_by)
            .fetch_one(&mut *tx)
            .await?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            jobs.push(JobRepo::insert(&mut tx, batch.id, row).await?);
        }

        tx.commit().await?;
        Ok((batch, jobs))
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Batch>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM batches WHERE id = $1");
        sqlx::query_as::<_, Batch>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Set `archived_at` if not already set. Archiving twice keeps the
    /// first timestamp.
    pub async fn archive(pool: &PgPool, id: DbId) -> Result<Option<Batch>, sqlx::Error> {
        let query = format!(
            "UPDATE batches \
             SET archived_at = COALESCE(archived_at, NOW()), updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Batch>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn status_counts(pool: &PgPool, id: DbId) -> Result<StatusCounts, StoreError> {
        let rows: Vec<(i16, i64)> = sqlx::query_as(
            "SELECT status_id, COUNT(*) FROM jobs WHERE batch_id = $1 GROUP BY status_id",
        )
        .bind(id)
        .fetch_all(pool)
        .await?;

        let mut counts = StatusCounts::default();
        for (status_id, n) in rows {
            counts.add(decode_status(status_id)?, n);
        }
        Ok(counts)
    }
}
