//! Template registry: the blueprints the scheduler reads from when it
//! validates a `POST /sessions` request against a template's defaults and
//! resource ceiling (spec.md §4.2).

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;

use sandbox_core::ids::TemplateId;
use sandbox_core::model::{ResourceLimit, Template};

use crate::error::{Result, StoreError};

#[derive(sqlx::FromRow)]
struct TemplateRow {
    id: String,
    name: String,
    image: String,
    runtime_kind: String,
    cpu_cores: f64,
    memory_bytes: i64,
    disk_bytes: i64,
    max_processes: Option<i32>,
    default_timeout_secs: i32,
    default_env: serde_json::Value,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TemplateRow> for Template {
    type Error = StoreError;

    fn try_from(row: TemplateRow) -> std::result::Result<Self, Self::Error> {
        let default_env: HashMap<String, String> = serde_json::from_value(row.default_env)?;
        Ok(Template {
            id: TemplateId::from(row.id),
            name: row.name,
            image: row.image,
            runtime_kind: row.runtime_kind,
            default_limits: ResourceLimit {
                cpu_cores: row.cpu_cores,
                memory_bytes: row.memory_bytes as u64,
                disk_bytes: row.disk_bytes as u64,
                max_processes: row.max_processes.map(|v| v as u32),
            },
            default_timeout_secs: row.default_timeout_secs as u32,
            default_env,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const TEMPLATE_COLUMNS: &str = r#"
    id, name, image, runtime_kind, cpu_cores, memory_bytes, disk_bytes, max_processes,
    default_timeout_secs, default_env, active, created_at, updated_at
"#;

pub struct TemplateStore {
    pool: PgPool,
}

impl TemplateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn register(&self, template: &Template) -> Result<()> {
        template.validate()?;
        let env_json = serde_json::to_value(&template.default_env)?;

        sqlx::query(
            r#"
            INSERT INTO templates (
                id, name, image, runtime_kind, cpu_cores, memory_bytes, disk_bytes,
                max_processes, default_timeout_secs, default_env, active, created_at, updated_at
            ) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                image = EXCLUDED.image,
                runtime_kind = EXCLUDED.runtime_kind,
                cpu_cores = EXCLUDED.cpu_cores,
                memory_bytes = EXCLUDED.memory_bytes,
                disk_bytes = EXCLUDED.disk_bytes,
                max_processes = EXCLUDED.max_processes,
                default_timeout_secs = EXCLUDED.default_timeout_secs,
                default_env = EXCLUDED.default_env,
                active = EXCLUDED.active,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&template.id.0)
        .bind(&template.name)
        .bind(&template.image)
        .bind(&template.runtime_kind)
        .bind(template.default_limits.cpu_cores)
        .bind(template.default_limits.memory_bytes as i64)
        .bind(template.default_limits.disk_bytes as i64)
        .bind(template.default_limits.max_processes.map(|v| v as i32))
        .bind(template.default_timeout_secs as i32)
        .bind(env_json)
        .bind(template.active)
        .bind(template.created_at)
        .bind(template.updated_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(template_id = %template.id, "template registered");
        Ok(())
    }

    pub async fn get(&self, id: &TemplateId) -> Result<Template> {
        let row: Option<TemplateRow> = sqlx::query_as(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = $1"
        ))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StoreError::NotFound("template", id.to_string()))?
            .try_into()
    }

    pub async fn list_active(&self) -> Result<Vec<Template>> {
        let rows: Vec<TemplateRow> = sqlx::query_as(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE active ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Template::try_from).collect()
    }

    pub async fn list_all(&self) -> Result<Vec<Template>> {
        let rows: Vec<TemplateRow> = sqlx::query_as(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates ORDER BY name"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Template::try_from).collect()
    }

    pub async fn deactivate(&self, id: &TemplateId) -> Result<()> {
        sqlx::query("UPDATE templates SET active = false, updated_at = $2 WHERE id = $1")
            .bind(&id.0)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_to_template_round_trips_resource_limit() {
        let row = TemplateRow {
            id: "python-3.11".into(),
            name: "Python 3.11".into(),
            image: "sandbox/python:3.11".into(),
            runtime_kind: "docker".into(),
            cpu_cores: 1.0,
            memory_bytes: 512 * 1024 * 1024,
            disk_bytes: 1024 * 1024 * 1024,
            max_processes: Some(64),
            default_timeout_secs: 30,
            default_env: serde_json::json!({}),
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let template: Template = row.try_into().unwrap();
        assert_eq!(template.default_limits.max_processes, Some(64));
        assert_eq!(template.id.to_string(), "python-3.11");
    }
}
