//! PostgreSQL-backed job store.
//!
//! Claiming is a single conditional `UPDATE ... WHERE status = $from`; Postgres
//! row locking serializes concurrent updates of the same row, so at most one
//! caller observes `rows_affected() == 1`.
//!
//! `next_runnable_job` reserves the row it returns (`reserved_until`) using
//! `FOR UPDATE SKIP LOCKED`, so concurrent callers are handed different jobs.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use super::job::{Job, JobStatus};
use super::store::{ensure_legal, FireRecord, FireRecorder, JobStore, RESERVATION_TTL};
use crate::kernel::error::StoreError;

const JOB_COLUMNS: &str =
    "id, kind, status, parameters, error_message, created_at, updated_at, started_at, finished_at";

#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Apply embedded migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert_job(&self, job: &Job) -> Result<Uuid, StoreError> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO jobs (id, kind, status, parameters, created_at, updated_at)
            VALUES ($1, $2, 'submitted', $3, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(job.id)
        .bind(&job.kind)
        .bind(Json(&job.parameters))
        .fetch_one(&self.pool)
        .await?;

        debug!(job_id = %id, kind = %job.kind, "inserted job");
        Ok(id)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    ) -> Result<bool, StoreError> {
        ensure_legal(from, to)?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $3,
                updated_at = NOW(),
                reserved_until = NULL,
                started_at = CASE WHEN $3 = 'processing'::job_status THEN NOW() ELSE started_at END,
                finished_at = CASE
                    WHEN $3 IN ('completed'::job_status, 'failed'::job_status) THEN NOW()
                    ELSE finished_at
                END
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn next_runnable_job(&self) -> Result<Option<Job>, StoreError> {
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            UPDATE jobs
            SET reserved_until = NOW() + make_interval(secs => $1)
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'submitted'
                  AND (reserved_until IS NULL OR reserved_until < NOW())
                ORDER BY created_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(RESERVATION_TTL.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn get_job_by_id(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let job = sqlx::query_as::<_, Job>(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(job)
    }

    async fn record_error(&self, id: Uuid, message: &str) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE jobs SET error_message = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(message)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}

#[async_trait]
impl FireRecorder for PostgresJobStore {
    async fn record_fire(&self, record: &FireRecord) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO schedule_fires (definition, job_id, fired_at) VALUES ($1, $2, $3)")
            .bind(&record.definition)
            .bind(record.job_id)
            .bind(record.fired_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
