//! Execution persistence.
//!
//! Terminal results are written with a compare-and-set on `status = 'RUNNING'`
//! so a late callback retry (spec.md §4.5's backoff loop) can never overwrite
//! a result that a previous delivery already recorded — the idempotency rule
//! from spec.md §4.4/§5.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use sandbox_core::ids::{ExecutionId, SessionId};
use sandbox_core::model::{ArtifactMetadata, Execution, ExecutionMetrics, ExecutionStatus};

use crate::error::{Result, StoreError};

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: uuid::Uuid,
    session_id: uuid::Uuid,
    status: ExecutionStatus,
    code: String,
    language: String,
    timeout_secs: i32,
    exit_code: Option<i32>,
    error_message: Option<String>,
    stdout: Option<String>,
    stderr: Option<String>,
    artifacts: serde_json::Value,
    duration_ms: Option<i64>,
    cpu_time_ms: Option<i64>,
    peak_memory_mb: Option<i64>,
    return_value: Option<serde_json::Value>,
    retry_count: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ExecutionRow> for Execution {
    type Error = StoreError;

    fn try_from(row: ExecutionRow) -> std::result::Result<Self, Self::Error> {
        let artifacts: Vec<ArtifactMetadata> = serde_json::from_value(row.artifacts)?;
        let metrics = row.duration_ms.map(|duration_ms| ExecutionMetrics {
            duration_ms: duration_ms as u64,
            cpu_time_ms: row.cpu_time_ms.map(|v| v as u64),
            peak_memory_mb: row.peak_memory_mb.map(|v| v as u64),
        });
        Ok(Execution {
            id: ExecutionId::from(row.id),
            session_id: SessionId::from(row.session_id),
            status: row.status,
            code: row.code,
            language: row.language,
            timeout_secs: row.timeout_secs as u32,
            exit_code: row.exit_code,
            error_message: row.error_message,
            stdout: row.stdout,
            stderr: row.stderr,
            artifacts,
            metrics,
            return_value: row.return_value,
            retry_count: row.retry_count as u32,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
        })
    }
}

const EXECUTION_COLUMNS: &str = r#"
    id, session_id, status, code, language, timeout_secs, exit_code, error_message,
    stdout, stderr, artifacts, duration_ms, cpu_time_ms, peak_memory_mb, return_value,
    retry_count, created_at, updated_at, completed_at
"#;

pub struct ExecutionStore {
    pool: PgPool,
}

impl ExecutionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a new execution in PENDING.
    pub async fn create(&self, execution: &Execution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO executions (
                id, session_id, status, code, language, timeout_secs, retry_count,
                created_at, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            "#,
        )
        .bind(execution.id.0)
        .bind(execution.session_id.0)
        .bind(execution.status)
        .bind(&execution.code)
        .bind(&execution.language)
        .bind(execution.timeout_secs as i32)
        .bind(execution.retry_count as i32)
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: ExecutionId) -> Result<Execution> {
        let row: Option<ExecutionRow> = sqlx::query_as(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StoreError::NotFound("execution", id.to_string()))?
            .try_into()
    }

    pub async fn list_for_session(&self, session_id: SessionId) -> Result<Vec<Execution>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE session_id = $1 ORDER BY created_at"
        ))
        .bind(session_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Execution::try_from).collect()
    }

    /// Move PENDING -> RUNNING. The dispatch engine calls this right before
    /// POSTing to the executor, so a crash between persist and POST leaves
    /// the execution recoverable by the reconciler rather than stuck PENDING
    /// forever.
    pub async fn mark_running(&self, id: ExecutionId) -> Result<()> {
        let result = sqlx::query(
            "UPDATE executions SET status = 'RUNNING', updated_at = $2 WHERE id = $1 AND status = 'PENDING'",
        )
        .bind(id.0)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "execution {id} was not PENDING"
            )));
        }
        Ok(())
    }

    /// Persist a terminal result. Idempotent: only applies if the execution
    /// is still RUNNING, so duplicate callbacks from the executor's retry
    /// loop (spec.md §4.5) are no-ops after the first delivery.
    #[allow(clippy::too_many_arguments)]
    pub async fn complete(
        &self,
        id: ExecutionId,
        status: ExecutionStatus,
        exit_code: Option<i32>,
        error_message: Option<String>,
        stdout: Option<String>,
        stderr: Option<String>,
        artifacts: Vec<ArtifactMetadata>,
        metrics: Option<ExecutionMetrics>,
        return_value: Option<serde_json::Value>,
    ) -> Result<bool> {
        let artifacts_json = serde_json::to_value(&artifacts)?;
        let (duration_ms, cpu_time_ms, peak_memory_mb) = match metrics {
            Some(m) => (
                Some(m.duration_ms as i64),
                m.cpu_time_ms.map(|v| v as i64),
                m.peak_memory_mb.map(|v| v as i64),
            ),
            None => (None, None, None),
        };

        let result = sqlx::query(
            r#"
            UPDATE executions SET
                status = $2, exit_code = $3, error_message = $4, stdout = $5, stderr = $6,
                artifacts = $7, duration_ms = $8, cpu_time_ms = $9, peak_memory_mb = $10,
                return_value = $11, updated_at = $12, completed_at = $12
            WHERE id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(id.0)
        .bind(status)
        .bind(exit_code)
        .bind(error_message)
        .bind(stdout)
        .bind(stderr)
        .bind(artifacts_json)
        .bind(duration_ms)
        .bind(cpu_time_ms)
        .bind(peak_memory_mb)
        .bind(return_value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        let applied = result.rows_affected() > 0;
        if !applied {
            tracing::debug!(execution_id = %id, "duplicate completion callback ignored");
        }
        Ok(applied)
    }

    pub async fn increment_retry(&self, id: ExecutionId) -> Result<()> {
        sqlx::query("UPDATE executions SET retry_count = retry_count + 1, updated_at = $2 WHERE id = $1")
            .bind(id.0)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Non-terminal executions whose session is being reaped, for marking
    /// CRASHED/TIMEOUT alongside the session transition.
    pub async fn find_active_for_session(&self, session_id: SessionId) -> Result<Vec<Execution>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE session_id = $1 AND status IN ('PENDING', 'RUNNING')"
        ))
        .bind(session_id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Execution::try_from).collect()
    }
}
