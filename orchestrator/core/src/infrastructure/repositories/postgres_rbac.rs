// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL RBAC Repository
//!
//! ```sql
//! CREATE TABLE roles (
//!     id       BIGSERIAL PRIMARY KEY,
//!     name     TEXT    NOT NULL UNIQUE,
//!     built_in BOOLEAN NOT NULL DEFAULT FALSE
//! );
//! CREATE TABLE permissions (
//!     id          BIGSERIAL PRIMARY KEY,
//!     object      TEXT NOT NULL,
//!     action      TEXT NOT NULL,
//!     description TEXT,
//!     UNIQUE (object, action)
//! );
//! CREATE TABLE role_permissions (
//!     id            BIGSERIAL PRIMARY KEY,
//!     role_id       BIGINT NOT NULL REFERENCES roles (id),
//!     permission_id BIGINT NOT NULL REFERENCES permissions (id),
//!     UNIQUE (role_id, permission_id)
//! );
//! ```

use crate::domain::rbac::{Permission, PermissionId, Role, RoleId};
use crate::domain::repository::{RbacRepository, RepositoryError};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;

pub struct PostgresRbacRepository {
    pool: PgPool,
}

impl PostgresRbacRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn role_from_row(row: &PgRow) -> Role {
    Role {
        id: RoleId(row.get("id")),
        name: row.get("name"),
        built_in: row.get("built_in"),
    }
}

fn permission_from_row(row: &PgRow) -> Permission {
    Permission {
        id: PermissionId(row.get("id")),
        object: row.get("object"),
        action: row.get("action"),
        description: row.get("description"),
    }
}

#[async_trait]
impl RbacRepository for PostgresRbacRepository {
    async fn list_roles(&self) -> Result<Vec<Role>, RepositoryError> {
        let rows = sqlx::query("SELECT id, name, built_in FROM roles ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(role_from_row).collect())
    }

    async fn permissions_for_role(&self, role: RoleId) -> Result<Vec<Permission>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT p.id, p.object, p.action, p.description
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = $1
            ORDER BY rp.id
            "#,
        )
        .bind(role.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(permission_from_row).collect())
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, built_in FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(role_from_row))
    }

    async fn create_role(&self, name: &str, built_in: bool) -> Result<Role, RepositoryError> {
        let row = sqlx::query("INSERT INTO roles (name, built_in) VALUES ($1, $2) RETURNING id, name, built_in")
            .bind(name)
            .bind(built_in)
            .fetch_one(&self.pool)
            .await?;
        Ok(role_from_row(&row))
    }

    async fn find_permission(&self, object: &str, action: &str) -> Result<Option<Permission>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, object, action, description FROM permissions WHERE object = $1 AND action = $2",
        )
        .bind(object)
        .bind(action)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(permission_from_row))
    }

    async fn create_permission(
        &self,
        object: &str,
        action: &str,
        description: Option<&str>,
    ) -> Result<Permission, RepositoryError> {
        let row = sqlx::query(
            r#"
            INSERT INTO permissions (object, action, description)
            VALUES ($1, $2, $3)
            RETURNING id, object, action, description
            "#,
        )
        .bind(object)
        .bind(action)
        .bind(description)
        .fetch_one(&self.pool)
        .await?;
        Ok(permission_from_row(&row))
    }

    async fn link(&self, role: RoleId, permission: PermissionId) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id)
            VALUES ($1, $2)
            ON CONFLICT (role_id, permission_id) DO NOTHING
            "#,
        )
        .bind(role.0)
        .bind(permission.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_all_role_permissions(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM role_permissions").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete_all_permissions(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM permissions").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete_all_roles(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM roles").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
