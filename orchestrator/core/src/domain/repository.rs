// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the relational store, one trait per aggregate,
//! implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `AppRepository` | `App` | `InMemoryAppRepository`, `PostgresAppRepository` |
//! | `RbacRepository` | `Role` / `Permission` / `RolePermission` | `InMemoryRbacRepository`, `PostgresRbacRepository` |
//!
//! Every method is a single statement (or a short transaction that never
//! spans a runtime or network call).

use crate::domain::app::{App, AppDraft, AppId, UserId};
use crate::domain::rbac::{Permission, PermissionId, Role, RoleId};
use async_trait::async_trait;

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

#[async_trait]
pub trait AppRepository: Send + Sync {
    /// Insert a new row; the store assigns id and timestamps.
    async fn create(&self, draft: &AppDraft, owner: UserId) -> Result<App, RepositoryError>;

    /// Overwrite the mutable fields of an existing row.
    async fn update(&self, app: &App) -> Result<(), RepositoryError>;

    /// `owner = None` skips ownership scoping.
    async fn find_by_id(&self, id: AppId, owner: Option<UserId>) -> Result<Option<App>, RepositoryError>;

    /// Rows ordered by id.
    async fn list(&self, owner: Option<UserId>, skip: usize, limit: usize) -> Result<Vec<App>, RepositoryError>;

    /// Returns false when no row matched.
    async fn delete(&self, id: AppId, owner: Option<UserId>) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait RbacRepository: Send + Sync {
    /// Roles ordered by id.
    async fn list_roles(&self) -> Result<Vec<Role>, RepositoryError>;

    /// Permissions linked to `role`, ordered by link id.
    async fn permissions_for_role(&self, role: RoleId) -> Result<Vec<Permission>, RepositoryError>;

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, RepositoryError>;

    async fn create_role(&self, name: &str, built_in: bool) -> Result<Role, RepositoryError>;

    async fn find_permission(&self, object: &str, action: &str) -> Result<Option<Permission>, RepositoryError>;

    async fn create_permission(
        &self,
        object: &str,
        action: &str,
        description: Option<&str>,
    ) -> Result<Permission, RepositoryError>;

    /// Link a role to a permission. Returns false if the link already existed.
    async fn link(&self, role: RoleId, permission: PermissionId) -> Result<bool, RepositoryError>;

    /// Returns the number of removed rows.
    async fn delete_all_role_permissions(&self) -> Result<u64, RepositoryError>;

    async fn delete_all_permissions(&self) -> Result<u64, RepositoryError>;

    async fn delete_all_roles(&self) -> Result<u64, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Constraint violated: {0}")]
    Conflict(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::Conflict(db.message().to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
