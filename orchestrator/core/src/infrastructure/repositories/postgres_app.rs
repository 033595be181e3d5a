// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL App Repository
//!
//! `AppRepository` backed by the `apps` table. `services` and `hosts` are
//! JSONB columns written whole on every statement, so a row never holds a
//! half-serialized desired state.
//!
//! ```sql
//! CREATE TABLE apps (
//!     id            BIGSERIAL PRIMARY KEY,
//!     name          TEXT        NOT NULL,
//!     services      JSONB       NOT NULL,
//!     hosts         JSONB       NOT NULL DEFAULT '[]',
//!     min_scale     INTEGER     NOT NULL,
//!     current_scale INTEGER     NOT NULL,
//!     max_scale     INTEGER     NOT NULL,
//!     force_stop    BOOLEAN     NOT NULL DEFAULT FALSE,
//!     user_id       BIGINT      NOT NULL,
//!     created_at    TIMESTAMPTZ NOT NULL,
//!     updated_at    TIMESTAMPTZ NOT NULL
//! );
//! ```

use crate::domain::app::{App, AppDraft, AppId, HostRoute, ScaleBounds, ServiceDefinition, UserId};
use crate::domain::repository::{AppRepository, RepositoryError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

const APP_COLUMNS: &str =
    "id, name, services, hosts, min_scale, current_scale, max_scale, force_stop, user_id, created_at, updated_at";

pub struct PostgresAppRepository {
    pool: PgPool,
}

impl PostgresAppRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn to_column(value: u32) -> Result<i32, RepositoryError> {
    i32::try_from(value).map_err(|_| RepositoryError::Serialization(format!("scale {} exceeds column range", value)))
}

fn from_column(value: i32) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| RepositoryError::Serialization(format!("negative scale {} in row", value)))
}

fn app_from_row(row: &PgRow) -> Result<App, RepositoryError> {
    let services: serde_json::Value = row.get("services");
    let hosts: serde_json::Value = row.get("hosts");
    let services: Vec<ServiceDefinition> = serde_json::from_value(services)?;
    let hosts: Vec<HostRoute> = serde_json::from_value(hosts)?;
    let created_at: DateTime<Utc> = row.get("created_at");
    let updated_at: DateTime<Utc> = row.get("updated_at");

    Ok(App {
        id: AppId(row.get("id")),
        name: row.get("name"),
        services,
        hosts,
        scale: ScaleBounds {
            min: from_column(row.get("min_scale"))?,
            current: from_column(row.get("current_scale"))?,
            max: from_column(row.get("max_scale"))?,
        },
        force_stop: row.get("force_stop"),
        user_id: UserId(row.get("user_id")),
        created_at,
        updated_at,
    })
}

#[async_trait]
impl AppRepository for PostgresAppRepository {
    async fn create(&self, draft: &AppDraft, owner: UserId) -> Result<App, RepositoryError> {
        let services = serde_json::to_value(&draft.services)?;
        let hosts = serde_json::to_value(&draft.hosts)?;
        let now = Utc::now();

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO apps (
                name, services, hosts, min_scale, current_scale, max_scale,
                force_stop, user_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
            RETURNING {}
            "#,
            APP_COLUMNS
        ))
        .bind(&draft.name)
        .bind(services)
        .bind(hosts)
        .bind(to_column(draft.scale.min)?)
        .bind(to_column(draft.scale.current)?)
        .bind(to_column(draft.scale.max)?)
        .bind(draft.force_stop)
        .bind(owner.0)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        app_from_row(&row)
    }

    async fn update(&self, app: &App) -> Result<(), RepositoryError> {
        let services = serde_json::to_value(&app.services)?;
        let hosts = serde_json::to_value(&app.hosts)?;

        let result = sqlx::query(
            r#"
            UPDATE apps SET
                services = $2,
                hosts = $3,
                min_scale = $4,
                current_scale = $5,
                max_scale = $6,
                force_stop = $7,
                updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(app.id.0)
        .bind(services)
        .bind(hosts)
        .bind(to_column(app.scale.min)?)
        .bind(to_column(app.scale.current)?)
        .bind(to_column(app.scale.max)?)
        .bind(app.force_stop)
        .bind(app.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("app {}", app.id)));
        }
        Ok(())
    }

    async fn find_by_id(&self, id: AppId, owner: Option<UserId>) -> Result<Option<App>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM apps WHERE id = $1 AND ($2::BIGINT IS NULL OR user_id = $2)",
            APP_COLUMNS
        ))
        .bind(id.0)
        .bind(owner.map(|o| o.0))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(app_from_row).transpose()
    }

    async fn list(&self, owner: Option<UserId>, skip: usize, limit: usize) -> Result<Vec<App>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM apps WHERE ($1::BIGINT IS NULL OR user_id = $1) ORDER BY id OFFSET $2 LIMIT $3",
            APP_COLUMNS
        ))
        .bind(owner.map(|o| o.0))
        .bind(skip as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(app_from_row).collect()
    }

    async fn delete(&self, id: AppId, owner: Option<UserId>) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM apps WHERE id = $1 AND ($2::BIGINT IS NULL OR user_id = $2)")
            .bind(id.0)
            .bind(owner.map(|o| o.0))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
