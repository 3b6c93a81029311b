//! Postgres-backed job store.
//!
//! The conditional update is a single `UPDATE ... WHERE id = $1 AND status =
//! $2 ... RETURNING` statement, so the compare-and-swap is atomic at the
//! database level; no advisory locks and no transactions spanning vendor
//! calls. When the update matches no row, a follow-up SELECT disambiguates
//! `NotFound` from `Conflict`.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use async_trait::async_trait;
use fetchgate_core::{Job, JobId, JobStatus, VendorKind};

use super::{JobStore, JobUpdate, StoreError};

/// Durable job store on PostgreSQL.
///
/// `PgPool` is internally reference-counted; cloning the store shares the
/// pool.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the jobs table and indexes if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id            UUID PRIMARY KEY,
                vendor        TEXT NOT NULL,
                payload       JSONB NOT NULL,
                status        TEXT NOT NULL,
                result        JSONB,
                error         TEXT,
                attempt_count INT NOT NULL DEFAULT 0,
                created_at    TIMESTAMPTZ NOT NULL,
                updated_at    TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS jobs_status_updated_at_idx ON jobs (status, updated_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;

        Ok(())
    }
}

const JOB_COLUMNS: &str =
    "id, vendor, payload, status, result, error, attempt_count, created_at, updated_at";

fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job, StoreError> {
    let status: String = row
        .try_get("status")
        .map_err(|e| map_sqlx_error("decode", e))?;
    let vendor: String = row
        .try_get("vendor")
        .map_err(|e| map_sqlx_error("decode", e))?;
    let id: Uuid = row.try_get("id").map_err(|e| map_sqlx_error("decode", e))?;

    Ok(Job {
        id: JobId::from_uuid(id),
        vendor: vendor
            .parse::<VendorKind>()
            .map_err(|e| StoreError::Storage(e.to_string()))?,
        payload: row
            .try_get::<JsonValue, _>("payload")
            .map_err(|e| map_sqlx_error("decode", e))?,
        status: status
            .parse::<JobStatus>()
            .map_err(|e| StoreError::Storage(e.to_string()))?,
        result: row
            .try_get::<Option<JsonValue>, _>("result")
            .map_err(|e| map_sqlx_error("decode", e))?,
        error: row
            .try_get::<Option<String>, _>("error")
            .map_err(|e| map_sqlx_error("decode", e))?,
        attempt_count: row
            .try_get::<i32, _>("attempt_count")
            .map_err(|e| map_sqlx_error("decode", e))? as u32,
        created_at: row
            .try_get::<DateTime<Utc>, _>("created_at")
            .map_err(|e| map_sqlx_error("decode", e))?,
        updated_at: row
            .try_get::<DateTime<Utc>, _>("updated_at")
            .map_err(|e| map_sqlx_error("decode", e))?,
    })
}

fn map_sqlx_error(operation: &str, e: sqlx::Error) -> StoreError {
    StoreError::Storage(format!("{operation}: {e}"))
}

#[async_trait]
impl JobStore for PostgresJobStore {
    #[instrument(skip(self, payload), fields(vendor = %vendor), err)]
    async fn create(&self, payload: JsonValue, vendor: VendorKind) -> Result<Job, StoreError> {
        let job = Job::new(payload, vendor);

        sqlx::query(
            r#"
            INSERT INTO jobs (id, vendor, payload, status, attempt_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.vendor.as_str())
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(job.attempt_count as i32)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("create", e))?;

        Ok(job)
    }

    #[instrument(skip(self), fields(job_id = %id), err)]
    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(row_to_job).transpose()
    }

    #[instrument(
        skip(self, update),
        fields(job_id = %id, expected = %expected, target = %update.status),
        err
    )]
    async fn update_if(
        &self,
        id: JobId,
        expected: JobStatus,
        update: JobUpdate,
    ) -> Result<Job, StoreError> {
        if !expected.can_transition_to(update.status) {
            return Err(StoreError::IllegalTransition {
                id,
                from: expected,
                to: update.status,
            });
        }

        // result iff complete, error iff failed (same enforcement as the
        // in-memory store).
        let result = if update.status == JobStatus::Complete {
            update.result
        } else {
            None
        };
        let error = if update.status == JobStatus::Failed {
            update.error
        } else {
            None
        };

        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs
            SET status = $3,
                result = $4,
                error = $5,
                attempt_count = COALESCE($6, attempt_count),
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(expected.as_str())
        .bind(update.status.as_str())
        .bind(result)
        .bind(error)
        .bind(update.attempt_count.map(|n| n as i32))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_if", e))?;

        if let Some(row) = row {
            return row_to_job(&row);
        }

        // No row matched: either the job does not exist or the status raced.
        let actual: Option<String> = sqlx::query_scalar("SELECT status FROM jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_if", e))?;

        match actual {
            None => Err(StoreError::NotFound(id)),
            Some(actual) => Err(StoreError::Conflict {
                id,
                expected,
                actual: actual
                    .parse::<JobStatus>()
                    .map_err(|e| StoreError::Storage(e.to_string()))?,
            }),
        }
    }

    #[instrument(skip(self), err)]
    async fn awaiting_callback_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobId>, StoreError> {
        let rows: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM jobs
            WHERE status = 'awaiting_callback' AND updated_at < $1
            ORDER BY updated_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("awaiting_callback_older_than", e))?;

        Ok(rows.into_iter().map(JobId::from_uuid).collect())
    }
}
