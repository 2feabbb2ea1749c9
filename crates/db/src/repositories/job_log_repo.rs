//! Repository for the append-only `job_log` table.

use sqlx::{FromRow, PgConnection, PgPool};

use forma_core::error_category::ErrorCategory;
use forma_core::stages::TransitionKind;
use forma_core::types::{DbId, Timestamp};

use crate::error::StoreError;
use crate::models::job_log::{LogEntry, NewLogEntry};
use crate::repositories::{decode_stage, decode_status};

/// Column list for `job_log` queries.
const COLUMNS: &str = "\
    id, job_id, batch_id, kind, from_stage_id, from_status_id, \
    to_stage_id, to_status_id, actor, message, error_category, created_at";

/// Upper bound for a single log listing.
const MAX_LIMIT: i64 = 1000;

#[derive(FromRow)]
struct LogRow {
    id: DbId,
    job_id: DbId,
    batch_id: DbId,
    kind: String,
    from_stage_id: i16,
    from_status_id: i16,
    to_stage_id: i16,
    to_status_id: i16,
    actor: String,
    message: Option<String>,
    error_category: Option<String>,
    created_at: Timestamp,
}

impl TryFrom<LogRow> for LogEntry {
    type Error = StoreError;

    fn try_from(row: LogRow) -> Result<Self, Self::Error> {
        let kind = TransitionKind::parse(&row.kind)
            .ok_or_else(|| StoreError::Codec(format!("unknown log kind '{}'", row.kind)))?;
        Ok(LogEntry {
            id: row.id,
            job_id: row.job_id,
            batch_id: row.batch_id,
            kind,
            from_stage: decode_stage(row.from_stage_id)?,
            from_status: decode_status(row.from_status_id)?,
            to_stage: decode_stage(row.to_stage_id)?,
            to_status: decode_status(row.to_status_id)?,
            actor: row.actor,
            message: row.message,
            error_category: row.error_category.as_deref().map(ErrorCategory::parse),
            created_at: row.created_at,
        })
    }
}

/// Append and read operations for the job log. There is no update or delete.
pub struct JobLogRepo;

impl JobLogRepo {
    /// Append an entry. Runs inside the caller's transaction.
    pub async fn insert(
        conn: &mut PgConnection,
        entry: &NewLogEntry,
    ) -> Result<LogEntry, StoreError> {
        let query = format!(
            "INSERT INTO job_log \
                 (job_id, batch_id, kind, from_stage_id, from_status_id, \
                  to_stage_id, to_status_id, actor, message, error_category) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, LogRow>(&query)
            .bind(entry.job_id)
            .bind(entry.batch_id)
            .bind(entry.kind.as_str())
            .bind(entry.from_stage.id())
            .bind(entry.from_status.id())
            .bind(entry.to_stage.id())
            .bind(entry.to_status.id())
            .bind(&entry.actor)
            .bind(&entry.message)
            .bind(entry.error_category.map(|c| c.as_str()))
            .fetch_one(conn)
            .await?;
        LogEntry::try_from(row)
    }

    /// Most recent entries first.
    pub async fn list_by_job(
        pool: &PgPool,
        job_id: DbId,
        limit: i64,
    ) -> Result<Vec<LogEntry>, StoreError> {
        let query = format!(
            "SELECT {COLUMNS} FROM job_log \
             WHERE job_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, LogRow>(&query)
            .bind(job_id)
            .bind(limit.clamp(1, MAX_LIMIT))
            .fetch_all(pool)
            .await?
            .into_iter()
            .map(LogEntry::try_from)
            .collect()
    }
}
