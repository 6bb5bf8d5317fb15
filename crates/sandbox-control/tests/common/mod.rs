//! Shared harness for sandbox-control's integration tests.
//!
//! Connects to a real Postgres instance named by `TEST_SANDBOX_DATABASE_URL`
//! and runs migrations against it. Tests that need a database skip
//! themselves via [`skip_if_no_env_db`] rather than failing when no test
//! database is configured, the same accommodation the store crate's own
//! harness makes for CI environments without Postgres available.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;

use sandbox_core::ids::{SessionId, TemplateId};
use sandbox_core::model::{ResourceLimit, Template};
use sandbox_store::{ExecutionStore, SessionStore, TemplateStore};

pub struct TestContext {
    pub pool: PgPool,
    pub sessions: Arc<SessionStore>,
    pub executions: Arc<ExecutionStore>,
    pub templates: Arc<TemplateStore>,
}

impl TestContext {
    pub async fn new() -> Result<Self, String> {
        let database_url = std::env::var("TEST_SANDBOX_DATABASE_URL")
            .map_err(|_| "TEST_SANDBOX_DATABASE_URL not set".to_string())?;

        let pool = PgPool::connect(&database_url)
            .await
            .map_err(|e| format!("failed to connect to test database: {e}"))?;

        sandbox_store::migrations::run(&pool)
            .await
            .map_err(|e| format!("failed to run migrations: {e}"))?;

        Ok(Self {
            sessions: Arc::new(SessionStore::new(pool.clone())),
            executions: Arc::new(ExecutionStore::new(pool.clone())),
            templates: Arc::new(TemplateStore::new(pool.clone())),
            pool,
        })
    }

    /// Registers a template under a caller-chosen id so concurrently running
    /// tests don't collide on the same row.
    pub async fn register_template(&self, id: &str, default_timeout_secs: u32) -> Template {
        let now = Utc::now();
        let template = Template {
            id: TemplateId::from(id),
            name: id.to_string(),
            image: "sandbox-template-python-basic:latest".to_string(),
            runtime_kind: "process".to_string(),
            default_limits: ResourceLimit {
                cpu_cores: 1.0,
                memory_bytes: 512 << 20,
                disk_bytes: 1 << 30,
                max_processes: None,
            },
            default_timeout_secs,
            default_env: HashMap::new(),
            active: true,
            created_at: now,
            updated_at: now,
        };
        self.templates.register(&template).await.expect("register template");
        template
    }

    /// Deletes every row this test wrote. `executions` cascades off
    /// `sessions`, so only the session and template ids need naming here.
    pub async fn cleanup(&self, session_ids: &[SessionId], template_ids: &[&str]) {
        for id in session_ids {
            sqlx::query("DELETE FROM sessions WHERE id = $1")
                .bind(id.0)
                .execute(&self.pool)
                .await
                .ok();
        }
        for id in template_ids {
            sqlx::query("DELETE FROM templates WHERE id = $1")
                .bind(*id)
                .execute(&self.pool)
                .await
                .ok();
        }
    }
}

/// Bails out of the current test body when no test database is configured,
/// instead of failing the suite in environments that don't run Postgres.
#[macro_export]
macro_rules! skip_if_no_env_db {
    () => {
        if std::env::var("TEST_SANDBOX_DATABASE_URL").is_err() {
            eprintln!("skipping: TEST_SANDBOX_DATABASE_URL not set");
            return;
        }
    };
}
