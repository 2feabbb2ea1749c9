//! Repository for the `jobs` table.
//!
//! Stage payloads live in JSONB columns and cross the boundary through
//! `sqlx::types::Json<T>`; stage and status are SMALLINT ids.

use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool};

use forma_core::content::ExtractionResult;
use forma_core::matching::MatchingResult;
use forma_core::payloads::{
    ApprovedMatches, ErrorRecord, GeneratedArtifact, StageCompletions, StagePayloads,
};
use forma_core::stages::{JobStatus, Stage};
use forma_core::types::{DbId, Timestamp};
use forma_core::validation::ValidationReport;

use crate::error::StoreError;
use crate::models::batch::NewJobRow;
use crate::models::job::Job;
use crate::models::job_log::NewLogEntry;
use crate::models::warning::{JobWarning, WarningChanges};
use crate::repositories::{decode_stage, decode_status, JobLogRepo, WarningRepo};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, batch_id, stage_id, status_id, priority, \
    source_path, template_path, output_name, completions, \
    extraction, proposed_matches, approved_matches, validation_report, artifact, \
    stage_override, last_error, retry_count, last_retry_at, version, \
    created_at, updated_at";

/// Maximum number of runnable jobs returned by one query.
const MAX_RUNNABLE_LIMIT: i64 = 500;

#[derive(FromRow)]
struct JobRow {
    id: DbId,
    batch_id: DbId,
    stage_id: i16,
    status_id: i16,
    priority: i32,
    source_path: String,
    template_path: String,
    output_name: String,
    completions: Json<StageCompletions>,
    extraction: Option<Json<ExtractionResult>>,
    proposed_matches: Option<Json<MatchingResult>>,
    approved_matches: Option<Json<ApprovedMatches>>,
    validation_report: Option<Json<ValidationReport>>,
    artifact: Option<Json<GeneratedArtifact>>,
    stage_override: bool,
    last_error: Option<Json<ErrorRecord>>,
    retry_count: i32,
    last_retry_at: Option<Timestamp>,
    version: i64,
    created_at: Timestamp,
    updated_at: Timestamp,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            batch_id: row.batch_id,
            stage: decode_stage(row.stage_id)?,
            status: decode_status(row.status_id)?,
            priority: row.priority,
            source_path: row.source_path,
            template_path: row.template_path,
            output_name: row.output_name,
            completions: row.completions.0,
            payloads: StagePayloads {
                extraction: row.extraction.map(|j| j.0),
                proposed: row.proposed_matches.map(|j| j.0),
                approved: row.approved_matches.map(|j| j.0),
                validation: row.validation_report.map(|j| j.0),
                artifact: row.artifact.map(|j| j.0),
            },
            stage_override: row.stage_override,
            last_error: row.last_error.map(|j| j.0),
            retry_count: row.retry_count,
            last_retry_at: row.last_retry_at,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn decode_all(rows: Vec<JobRow>) -> Result<Vec<Job>, StoreError> {
    rows.into_iter().map(Job::try_from).collect()
}

/// Provides read and versioned-write operations for jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a queued job at `Ingested`. Runs inside the batch transaction.
    pub async fn insert(
        conn: &mut PgConnection,
        batch_id: DbId,
        input: &NewJobRow,
    ) -> Result<Job, StoreError> {
        let mut completions = StageCompletions::new();
        completions.record(
            Stage::Ingested,
            forma_core::types::SYSTEM_ACTOR,
            chrono::Utc::now(),
        );

        let query = format!(
            "INSERT INTO jobs \
                 (batch_id, stage_id, status_id, priority, source_path, template_path, \
                  output_name, completions) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query_as::<_, JobRow>(&query)
            .bind(batch_id)
            .bind(Stage::Ingested.id())
            .bind(JobStatus::Queued.id())
            .bind(input.priority)
            .bind(&input.source_path)
            .bind(&input.template_path)
            .bind(&input.output_name)
            .bind(Json(&completions))
            .fetch_one(conn)
            .await?;
        Job::try_from(row)
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    pub async fn list_by_batch(pool: &PgPool, batch_id: DbId) -> Result<Vec<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE batch_id = $1 ORDER BY id ASC");
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(batch_id)
            .fetch_all(pool)
            .await?;
        decode_all(rows)
    }

    /// Queued jobs at automated stages in non-archived batches.
    pub async fn list_runnable(
        pool: &PgPool,
        batch_id: Option<DbId>,
        limit: i64,
    ) -> Result<Vec<Job>, StoreError> {
        let stage_ids: Vec<i16> = Stage::ALL
            .iter()
            .filter(|s| s.is_automated())
            .map(|s| s.id())
            .collect();
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status_id = $1 \
               AND stage_id = ANY($2) \
               AND ($3::BIGINT IS NULL OR batch_id = $3) \
               AND batch_id IN (SELECT id FROM batches WHERE archived_at IS NULL) \
             ORDER BY priority DESC, created_at ASC, id ASC \
             LIMIT $4"
        );
        let rows = sqlx::query_as::<_, JobRow>(&query)
            .bind(JobStatus::Queued.id())
            .bind(&stage_ids)
            .bind(batch_id)
            .bind(limit.clamp(1, MAX_RUNNABLE_LIMIT))
            .fetch_all(pool)
            .await?;
        decode_all(rows)
    }

    /// Write every mutable column of `job` if the stored version equals
    /// `expected_version`, and append the log entries and warning changes
    /// in the same transaction. The version is bumped by one.
    pub async fn update_versioned(
        pool: &PgPool,
        job: &Job,
        expected_version: i64,
        entries: &[NewLogEntry],
        warnings: &WarningChanges,
    ) -> Result<(Job, Vec<JobWarning>), StoreError> {
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE jobs SET \
                 stage_id = $3, status_id = $4, completions = $5, \
                 extraction = $6, proposed_matches = $7, approved_matches = $8, \
                 validation_report = $9, artifact = $10, \
                 stage_override = $11, last_error = $12, \
                 retry_count = $13, last_retry_at = $14, \
                 version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND version = $2 \
             RETURNING {COLUMNS}"
        );
        let p = &job.payloads;
        let updated = sqlx::query_as::<_, JobRow>(&query)
            .bind(job.id)
            .bind(expected_version)
            .bind(job.stage.id())
            .bind(job.status.id())
            .bind(Json(&job.completions))
            .bind(p.extraction.as_ref().map(Json))
            .bind(p.proposed.as_ref().map(Json))
            .bind(p.approved.as_ref().map(Json))
            .bind(p.validation.as_ref().map(Json))
            .bind(p.artifact.as_ref().map(Json))
            .bind(job.stage_override)
            .bind(job.last_error.as_ref().map(Json))
            .bind(job.retry_count)
            .bind(job.last_retry_at)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = updated else {
            let found: Option<(i64,)> = sqlx::query_as("SELECT version FROM jobs WHERE id = $1")
                .bind(job.id)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match found {
                None => StoreError::NotFound {
                    entity: "job",
                    id: job.id,
                },
                Some((found,)) => StoreError::VersionConflict {
                    job_id: job.id,
                    expected: expected_version,
                    found,
                },
            });
        };

        for entry in entries {
            JobLogRepo::insert(&mut tx, entry).await?;
        }
        for stage in &warnings.resolve_stages {
            WarningRepo::resolve_for_stage(&mut tx, job.id, *stage).await?;
        }
        let created = WarningRepo::insert_many(&mut tx, job.id, &warnings.append).await?;
        tx.commit().await?;
        Ok((Job::try_from(row)?, created))
    }
}
