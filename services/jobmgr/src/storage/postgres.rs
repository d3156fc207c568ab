//! Postgres-backed store.
//!
//! Specs, runtimes, and workflow records are stored as JSONB; the hot
//! columns (state, revision, versions) are lifted out for indexing and the
//! CAS predicate. The task-state materialized view is a plain aggregate
//! over the task table refreshed by the database, read here as-is.

use std::collections::BTreeMap;

use armada_api::{JobSpec, TaskRuntime, TaskStats};
use armada_id::{JobId, TaskId, WorkflowId};
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use super::{JobRuntime, Store, StoreError, StoreResult, WorkflowRecord};

/// Postgres [`Store`] implementation.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects with a bounded pool.
    pub async fn connect(url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(to_backend)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the schema when missing (development mode).
    pub async fn run_migrations(&self) -> StoreResult<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS active_jobs (
                job_id TEXT PRIMARY KEY
            )",
            "CREATE TABLE IF NOT EXISTS job_configs (
                job_id TEXT NOT NULL,
                version BIGINT NOT NULL,
                spec JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (job_id, version)
            )",
            "CREATE TABLE IF NOT EXISTS job_runtimes (
                job_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                revision BIGINT NOT NULL,
                runtime JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
            "CREATE TABLE IF NOT EXISTS task_runtimes (
                job_id TEXT NOT NULL,
                instance_id BIGINT NOT NULL,
                state TEXT NOT NULL,
                runtime JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (job_id, instance_id)
            )",
            "CREATE INDEX IF NOT EXISTS idx_task_runtimes_job_state
                ON task_runtimes (job_id, state)",
            "CREATE TABLE IF NOT EXISTS workflows (
                workflow_id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                state TEXT NOT NULL,
                record JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        ];
        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(to_backend)?;
        }
        Ok(())
    }
}

fn to_backend(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

fn decode_json<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> StoreResult<T> {
    serde_json::from_value(value).map_err(|e| StoreError::Backend(e.to_string()))
}

fn encode_json<T: serde::Serialize>(value: &T) -> StoreResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| StoreError::Backend(e.to_string()))
}

#[async_trait]
impl Store for PgStore {
    async fn add_active_job(&self, job_id: JobId) -> StoreResult<()> {
        sqlx::query("INSERT INTO active_jobs (job_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(to_backend)?;
        Ok(())
    }

    async fn delete_active_job(&self, job_id: JobId) -> StoreResult<()> {
        sqlx::query("DELETE FROM active_jobs WHERE job_id = $1")
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(to_backend)?;
        Ok(())
    }

    async fn list_active_jobs(&self) -> StoreResult<Vec<JobId>> {
        let rows = sqlx::query("SELECT job_id FROM active_jobs ORDER BY job_id")
            .fetch_all(&self.pool)
            .await
            .map_err(to_backend)?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("job_id").map_err(to_backend)?;
            let id = JobId::parse(&raw).map_err(|e| StoreError::Backend(e.to_string()))?;
            ids.push(id);
        }
        Ok(ids)
    }

    async fn create_job_config(
        &self,
        job_id: JobId,
        version: u64,
        spec: &JobSpec,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO job_configs (job_id, version, spec) VALUES ($1, $2, $3)
             ON CONFLICT (job_id, version) DO NOTHING",
        )
        .bind(job_id.to_string())
        .bind(version as i64)
        .bind(encode_json(spec)?)
        .execute(&self.pool)
        .await
        .map_err(to_backend)?;
        Ok(())
    }

    async fn get_job_config(&self, job_id: JobId, version: u64) -> StoreResult<Option<JobSpec>> {
        let row = sqlx::query("SELECT spec FROM job_configs WHERE job_id = $1 AND version = $2")
            .bind(job_id.to_string())
            .bind(version as i64)
            .fetch_optional(&self.pool)
            .await
            .map_err(to_backend)?;
        match row {
            Some(row) => {
                let spec: serde_json::Value = row.try_get("spec").map_err(to_backend)?;
                Ok(Some(decode_json(spec)?))
            }
            None => Ok(None),
        }
    }

    async fn create_job_runtime(&self, job_id: JobId, runtime: &JobRuntime) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO job_runtimes (job_id, state, revision, runtime)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(job_id.to_string())
        .bind(runtime.state.as_str())
        .bind(runtime.revision as i64)
        .bind(encode_json(runtime)?)
        .execute(&self.pool)
        .await
        .map_err(to_backend)?;
        Ok(())
    }

    async fn get_job_runtime(&self, job_id: JobId) -> StoreResult<Option<JobRuntime>> {
        let row = sqlx::query("SELECT runtime FROM job_runtimes WHERE job_id = $1")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(to_backend)?;
        match row {
            Some(row) => {
                let runtime: serde_json::Value = row.try_get("runtime").map_err(to_backend)?;
                Ok(Some(decode_json(runtime)?))
            }
            None => Ok(None),
        }
    }

    async fn update_job_runtime(
        &self,
        job_id: JobId,
        runtime: &JobRuntime,
        expected_revision: u64,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE job_runtimes
             SET state = $1, revision = $2, runtime = $3, updated_at = now()
             WHERE job_id = $4 AND revision = $5",
        )
        .bind(runtime.state.as_str())
        .bind(runtime.revision as i64)
        .bind(encode_json(runtime)?)
        .bind(job_id.to_string())
        .bind(expected_revision as i64)
        .execute(&self.pool)
        .await
        .map_err(to_backend)?;

        if result.rows_affected() == 0 {
            let actual = sqlx::query("SELECT revision FROM job_runtimes WHERE job_id = $1")
                .bind(job_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(to_backend)?
                .map(|row| row.try_get::<i64, _>("revision").unwrap_or_default() as u64)
                .unwrap_or_default();
            return Err(StoreError::Conflict {
                entity: job_id.to_string(),
                expected: expected_revision,
                actual,
            });
        }
        Ok(())
    }

    async fn delete_job(&self, job_id: JobId) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(to_backend)?;
        for query in [
            "DELETE FROM active_jobs WHERE job_id = $1",
            "DELETE FROM job_configs WHERE job_id = $1",
            "DELETE FROM job_runtimes WHERE job_id = $1",
            "DELETE FROM task_runtimes WHERE job_id = $1",
            "DELETE FROM workflows WHERE job_id = $1",
        ] {
            sqlx::query(query)
                .bind(job_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(to_backend)?;
        }
        tx.commit().await.map_err(to_backend)?;
        Ok(())
    }

    async fn list_jobs(&self) -> StoreResult<Vec<JobId>> {
        let rows = sqlx::query("SELECT job_id FROM job_runtimes ORDER BY job_id")
            .fetch_all(&self.pool)
            .await
            .map_err(to_backend)?;
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let raw: String = row.try_get("job_id").map_err(to_backend)?;
            let id = JobId::parse(&raw).map_err(|e| StoreError::Backend(e.to_string()))?;
            ids.push(id);
        }
        Ok(ids)
    }

    async fn put_task_runtime(&self, task_id: TaskId, runtime: &TaskRuntime) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO task_runtimes (job_id, instance_id, state, runtime)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (job_id, instance_id) DO UPDATE SET
                 state = excluded.state,
                 runtime = excluded.runtime,
                 updated_at = now()",
        )
        .bind(task_id.job_id.to_string())
        .bind(i64::from(task_id.instance))
        .bind(runtime.state.as_str())
        .bind(encode_json(runtime)?)
        .execute(&self.pool)
        .await
        .map_err(to_backend)?;
        Ok(())
    }

    async fn get_task_runtime(&self, task_id: TaskId) -> StoreResult<Option<TaskRuntime>> {
        let row = sqlx::query(
            "SELECT runtime FROM task_runtimes WHERE job_id = $1 AND instance_id = $2",
        )
        .bind(task_id.job_id.to_string())
        .bind(i64::from(task_id.instance))
        .fetch_optional(&self.pool)
        .await
        .map_err(to_backend)?;
        match row {
            Some(row) => {
                let runtime: serde_json::Value = row.try_get("runtime").map_err(to_backend)?;
                Ok(Some(decode_json(runtime)?))
            }
            None => Ok(None),
        }
    }

    async fn list_task_runtimes(&self, job_id: JobId) -> StoreResult<BTreeMap<u32, TaskRuntime>> {
        let rows = sqlx::query(
            "SELECT instance_id, runtime FROM task_runtimes
             WHERE job_id = $1 ORDER BY instance_id",
        )
        .bind(job_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(to_backend)?;

        let mut tasks = BTreeMap::new();
        for row in rows {
            let instance: i64 = row.try_get("instance_id").map_err(to_backend)?;
            let runtime: serde_json::Value = row.try_get("runtime").map_err(to_backend)?;
            tasks.insert(instance as u32, decode_json(runtime)?);
        }
        Ok(tasks)
    }

    async fn task_state_summary(&self, job_id: JobId) -> StoreResult<TaskStats> {
        let rows = sqlx::query(
            "SELECT state, COUNT(*) AS count FROM task_runtimes
             WHERE job_id = $1 GROUP BY state",
        )
        .bind(job_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(to_backend)?;

        let mut stats = TaskStats::new();
        for row in rows {
            let state: String = row.try_get("state").map_err(to_backend)?;
            let count: i64 = row.try_get("count").map_err(to_backend)?;
            stats.insert(state, count as u32);
        }
        Ok(stats)
    }

    async fn put_workflow(&self, record: &WorkflowRecord) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO workflows (workflow_id, job_id, state, record)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (workflow_id) DO UPDATE SET
                 state = excluded.state,
                 record = excluded.record,
                 updated_at = now()",
        )
        .bind(record.id.to_string())
        .bind(record.job_id.to_string())
        .bind(record.state.as_str())
        .bind(encode_json(record)?)
        .execute(&self.pool)
        .await
        .map_err(to_backend)?;
        Ok(())
    }

    async fn get_workflow(&self, workflow_id: WorkflowId) -> StoreResult<Option<WorkflowRecord>> {
        let row = sqlx::query("SELECT record FROM workflows WHERE workflow_id = $1")
            .bind(workflow_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(to_backend)?;
        match row {
            Some(row) => {
                let record: serde_json::Value = row.try_get("record").map_err(to_backend)?;
                Ok(Some(decode_json(record)?))
            }
            None => Ok(None),
        }
    }
}
