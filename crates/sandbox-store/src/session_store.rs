//! Session persistence.
//!
//! The session row is the only place lifecycle transitions are allowed to
//! happen (spec.md §4.1, §5): [`SessionStore::transition`] takes a
//! `SELECT ... FOR UPDATE` row lock on the session id and refuses the update
//! unless the current status permits the requested transition, so the
//! scheduler, dispatch engine, and reaper never stomp on each other.

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;

use sandbox_core::ids::{SessionId, TemplateId};
use sandbox_core::model::{ResourceLimit, Session, SessionMode, SessionStatus};

use crate::error::{Result, StoreError};

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: uuid::Uuid,
    template_id: String,
    mode: SessionMode,
    status: SessionStatus,
    cpu_cores: f64,
    memory_bytes: i64,
    disk_bytes: i64,
    max_processes: Option<i32>,
    workspace_path: String,
    runtime_kind: String,
    runtime_node_id: Option<String>,
    container_id: Option<String>,
    pod_name: Option<String>,
    env: serde_json::Value,
    timeout_secs: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    last_activity_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for Session {
    type Error = StoreError;

    fn try_from(row: SessionRow) -> std::result::Result<Self, Self::Error> {
        let env: HashMap<String, String> = serde_json::from_value(row.env)?;
        Ok(Session {
            id: SessionId::from(row.id),
            template_id: TemplateId::from(row.template_id),
            mode: row.mode,
            status: row.status,
            resource_limit: ResourceLimit {
                cpu_cores: row.cpu_cores,
                memory_bytes: row.memory_bytes as u64,
                disk_bytes: row.disk_bytes as u64,
                max_processes: row.max_processes.map(|v| v as u32),
            },
            workspace_path: row.workspace_path,
            runtime_kind: row.runtime_kind,
            runtime_node_id: row.runtime_node_id,
            container_id: row.container_id,
            pod_name: row.pod_name,
            env,
            timeout_secs: row.timeout_secs as u32,
            created_at: row.created_at,
            updated_at: row.updated_at,
            completed_at: row.completed_at,
            last_activity_at: row.last_activity_at,
        })
    }
}

const SESSION_COLUMNS: &str = r#"
    id, template_id, mode, status, cpu_cores, memory_bytes, disk_bytes, max_processes,
    workspace_path, runtime_kind, runtime_node_id, container_id, pod_name, env,
    timeout_secs, created_at, updated_at, completed_at, last_activity_at
"#;

/// Optional filters for [`SessionStore::list`].
#[derive(Debug, Default, Clone)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub template_id: Option<TemplateId>,
    pub limit: i64,
    pub offset: i64,
}

pub struct SessionStore {
    pool: PgPool,
}

impl SessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Exposed for dependency health checks (`GET /health/detailed`).
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert a session in PENDING. Called before any backend side effect,
    /// per the persist-intent-then-act ordering in spec.md §5.
    pub async fn create(&self, session: &Session) -> Result<()> {
        let env_json = serde_json::to_value(&session.env)?;
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, template_id, mode, status, cpu_cores, memory_bytes, disk_bytes,
                max_processes, workspace_path, runtime_kind, runtime_node_id,
                container_id, pod_name, env, timeout_secs, created_at, updated_at,
                completed_at, last_activity_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19)
            "#,
        )
        .bind(session.id.0)
        .bind(session.template_id.0.as_str())
        .bind(session.mode)
        .bind(session.status)
        .bind(session.resource_limit.cpu_cores)
        .bind(session.resource_limit.memory_bytes as i64)
        .bind(session.resource_limit.disk_bytes as i64)
        .bind(session.resource_limit.max_processes.map(|v| v as i32))
        .bind(&session.workspace_path)
        .bind(&session.runtime_kind)
        .bind(&session.runtime_node_id)
        .bind(&session.container_id)
        .bind(&session.pod_name)
        .bind(env_json)
        .bind(session.timeout_secs as i32)
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.completed_at)
        .bind(session.last_activity_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(session_id = %session.id, "session created");
        Ok(())
    }

    pub async fn get(&self, id: SessionId) -> Result<Session> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StoreError::NotFound("session", id.to_string()))?
            .try_into()
    }

    /// Used by the `container_exited` callback, which only identifies the
    /// container, not the session (spec.md §6.2).
    pub async fn find_by_container_id(&self, container_id: &str) -> Result<Session> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE container_id = $1"
        ))
        .bind(container_id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StoreError::NotFound("session", container_id.to_string()))?
            .try_into()
    }

    pub async fn list(&self, filter: &SessionFilter) -> Result<Vec<Session>> {
        let mut query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE 1 = 1");
        if filter.status.is_some() {
            query.push_str(" AND status = $1");
        }
        if filter.template_id.is_some() {
            query.push_str(if filter.status.is_some() {
                " AND template_id = $2"
            } else {
                " AND template_id = $1"
            });
        }
        query.push_str(" ORDER BY created_at DESC LIMIT $N OFFSET $M");

        // Parameter indices shift depending on which filters are present;
        // bind them in the same order the placeholders above were inserted.
        let bound_query = bind_limit_offset(
            &query,
            filter.status.is_some(),
            filter.template_id.is_some(),
        );
        let mut q = sqlx::query_as::<_, SessionRow>(&bound_query);
        if let Some(status) = filter.status {
            q = q.bind(status);
        }
        if let Some(template_id) = &filter.template_id {
            q = q.bind(template_id.0.as_str());
        }
        let limit = if filter.limit > 0 { filter.limit } else { 50 };
        q = q.bind(limit).bind(filter.offset.max(0));

        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Session::try_from).collect()
    }

    /// Row-lock the session, verify the transition is legal per
    /// [`SessionStatus::can_transition_to`], and persist it. Returns the
    /// updated session.
    pub async fn transition(
        &self,
        id: SessionId,
        next: SessionStatus,
        patch: impl FnOnce(&mut Session),
    ) -> Result<Session> {
        let mut tx = self.pool.begin().await?;

        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.0)
        .fetch_optional(&mut *tx)
        .await?;

        let mut session: Session = row
            .ok_or_else(|| StoreError::NotFound("session", id.to_string()))?
            .try_into()?;

        if !session.status.can_transition_to(next) {
            return Err(StoreError::Conflict(format!(
                "session {id} cannot move from {:?} to {next:?}",
                session.status
            )));
        }

        session.status = next;
        session.updated_at = Utc::now();
        patch(&mut session);

        let env_json = serde_json::to_value(&session.env)?;
        sqlx::query(
            r#"
            UPDATE sessions SET
                status = $2, runtime_node_id = $3, container_id = $4, pod_name = $5,
                env = $6, updated_at = $7, completed_at = $8, last_activity_at = $9
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(session.status)
        .bind(&session.runtime_node_id)
        .bind(&session.container_id)
        .bind(&session.pod_name)
        .bind(env_json)
        .bind(session.updated_at)
        .bind(session.completed_at)
        .bind(session.last_activity_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(session_id = %id, status = ?session.status, "session transitioned");
        Ok(session)
    }

    pub async fn touch_activity(&self, id: SessionId) -> Result<()> {
        sqlx::query("UPDATE sessions SET last_activity_at = $2 WHERE id = $1")
            .bind(id.0)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Sessions idle (no activity) longer than `threshold`, still RUNNING.
    pub async fn find_idle(&self, threshold: chrono::Duration) -> Result<Vec<Session>> {
        let cutoff = Utc::now() - threshold;
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE status = 'RUNNING' AND last_activity_at < $1"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Session::try_from).collect()
    }

    /// Sessions that have exceeded their absolute lifetime, still RUNNING.
    pub async fn find_over_lifetime(&self, max_lifetime: chrono::Duration) -> Result<Vec<Session>> {
        let cutoff = Utc::now() - max_lifetime;
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE status = 'RUNNING' AND created_at < $1"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Session::try_from).collect()
    }

    /// Sessions whose executor heartbeat is missing or stale.
    pub async fn find_missed_heartbeat(&self, threshold: chrono::Duration) -> Result<Vec<Session>> {
        let cutoff = Utc::now() - threshold;
        let rows: Vec<SessionRow> = sqlx::query_as(&format!(
            r#"
            SELECT s.id, s.template_id, s.mode, s.status, s.cpu_cores, s.memory_bytes,
                   s.disk_bytes, s.max_processes, s.workspace_path, s.runtime_kind,
                   s.runtime_node_id, s.container_id, s.pod_name, s.env, s.timeout_secs,
                   s.created_at, s.updated_at, s.completed_at, s.last_activity_at
            FROM sessions s
            LEFT JOIN session_heartbeats h ON h.session_id = s.id
            WHERE s.status = 'RUNNING' AND (h.last_heartbeat IS NULL OR h.last_heartbeat < $1)
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Session::try_from).collect()
    }

    pub async fn record_heartbeat(&self, id: SessionId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_heartbeats (session_id, last_heartbeat)
            VALUES ($1, $2)
            ON CONFLICT (session_id) DO UPDATE SET last_heartbeat = EXCLUDED.last_heartbeat
            "#,
        )
        .bind(id.0)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every container id the store believes is live, for startup reconciliation
    /// against what the backend actually reports (spec.md §4.6).
    pub async fn live_container_ids(&self) -> Result<Vec<(SessionId, String)>> {
        let rows = sqlx::query(
            "SELECT id, container_id FROM sessions WHERE status = 'RUNNING' AND container_id IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let id: uuid::Uuid = r.try_get("id").ok()?;
                let container_id: String = r.try_get("container_id").ok()?;
                Some((SessionId::from(id), container_id))
            })
            .collect())
    }
}

fn bind_limit_offset(query: &str, has_status: bool, has_template: bool) -> String {
    let (limit_idx, offset_idx) = match (has_status, has_template) {
        (true, true) => (3, 4),
        (true, false) | (false, true) => (2, 3),
        (false, false) => (1, 2),
    };
    query
        .replace("$N", &format!("${limit_idx}"))
        .replace("$M", &format!("${offset_idx}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_offset_placeholders_shift_with_filters() {
        let q = "SELECT 1 WHERE status = $1 LIMIT $N OFFSET $M";
        assert_eq!(bind_limit_offset(q, true, false), "SELECT 1 WHERE status = $1 LIMIT $2 OFFSET $3");
        let q2 = "SELECT 1 LIMIT $N OFFSET $M";
        assert_eq!(bind_limit_offset(q2, false, false), "SELECT 1 LIMIT $1 OFFSET $2");
    }
}
