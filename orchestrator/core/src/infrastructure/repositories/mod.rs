// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! Infrastructure implementations of the repository traits defined in
//! `crate::domain::repository`.
//!
//! ## PostgreSQL Repositories
//!
//! - **PostgresAppRepository** - App desired state (`apps` table, JSONB services/hosts)
//! - **PostgresRbacRepository** - `roles`, `permissions`, `role_permissions`
//!
//! ## In-Memory Repositories
//!
//! Lock-protected implementations for tests and local development:
//! - **InMemoryAppRepository**
//! - **InMemoryRbacRepository**
//!
//! Both in-memory stores enforce the same uniqueness rules as the schema
//! (role name, `(object, action)`, `(role_id, permission_id)`).

pub mod postgres_app;
pub mod postgres_rbac;

use crate::domain::app::{App, AppDraft, AppId, UserId};
use crate::domain::rbac::{Permission, PermissionId, Role, RoleId, RolePermission};
use crate::domain::repository::{AppRepository, RbacRepository, RepositoryError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default)]
struct AppTable {
    next_id: i64,
    rows: BTreeMap<AppId, App>,
}

#[derive(Clone, Default)]
pub struct InMemoryAppRepository {
    table: Arc<RwLock<AppTable>>,
}

impl InMemoryAppRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start id assignment after `last_id`, so tests can pin concrete ids.
    pub fn starting_after(last_id: i64) -> Self {
        let repo = Self::default();
        repo.table.write().next_id = last_id;
        repo
    }
}

fn owned_by(app: &App, owner: Option<UserId>) -> bool {
    owner.map_or(true, |owner| app.user_id == owner)
}

#[async_trait]
impl AppRepository for InMemoryAppRepository {
    async fn create(&self, draft: &AppDraft, owner: UserId) -> Result<App, RepositoryError> {
        let mut table = self.table.write();
        table.next_id += 1;
        let app = App::from_draft(AppId(table.next_id), owner, draft.clone());
        table.rows.insert(app.id, app.clone());
        Ok(app)
    }

    async fn update(&self, app: &App) -> Result<(), RepositoryError> {
        let mut table = self.table.write();
        match table.rows.get_mut(&app.id) {
            Some(row) => {
                *row = app.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("app {}", app.id))),
        }
    }

    async fn find_by_id(&self, id: AppId, owner: Option<UserId>) -> Result<Option<App>, RepositoryError> {
        let table = self.table.read();
        Ok(table.rows.get(&id).filter(|app| owned_by(app, owner)).cloned())
    }

    async fn list(&self, owner: Option<UserId>, skip: usize, limit: usize) -> Result<Vec<App>, RepositoryError> {
        let table = self.table.read();
        Ok(table
            .rows
            .values()
            .filter(|app| owned_by(app, owner))
            .skip(skip)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: AppId, owner: Option<UserId>) -> Result<bool, RepositoryError> {
        let mut table = self.table.write();
        let matches = table.rows.get(&id).is_some_and(|app| owned_by(app, owner));
        if matches {
            table.rows.remove(&id);
        }
        Ok(matches)
    }
}

#[derive(Default)]
struct RbacTables {
    next_role_id: i64,
    next_permission_id: i64,
    next_link_id: i64,
    roles: Vec<Role>,
    permissions: Vec<Permission>,
    links: Vec<RolePermission>,
}

#[derive(Clone, Default)]
pub struct InMemoryRbacRepository {
    tables: Arc<RwLock<RbacTables>>,
}

impl InMemoryRbacRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn link_count(&self) -> usize {
        self.tables.read().links.len()
    }
}

#[async_trait]
impl RbacRepository for InMemoryRbacRepository {
    async fn list_roles(&self) -> Result<Vec<Role>, RepositoryError> {
        Ok(self.tables.read().roles.clone())
    }

    async fn permissions_for_role(&self, role: RoleId) -> Result<Vec<Permission>, RepositoryError> {
        let tables = self.tables.read();
        Ok(tables
            .links
            .iter()
            .filter(|link| link.role_id == role)
            .filter_map(|link| tables.permissions.iter().find(|p| p.id == link.permission_id))
            .cloned()
            .collect())
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, RepositoryError> {
        Ok(self.tables.read().roles.iter().find(|r| r.name == name).cloned())
    }

    async fn create_role(&self, name: &str, built_in: bool) -> Result<Role, RepositoryError> {
        let mut tables = self.tables.write();
        if tables.roles.iter().any(|r| r.name == name) {
            return Err(RepositoryError::Conflict(format!("role '{}' already exists", name)));
        }
        tables.next_role_id += 1;
        let role = Role {
            id: RoleId(tables.next_role_id),
            name: name.to_string(),
            built_in,
        };
        tables.roles.push(role.clone());
        Ok(role)
    }

    async fn find_permission(&self, object: &str, action: &str) -> Result<Option<Permission>, RepositoryError> {
        Ok(self
            .tables
            .read()
            .permissions
            .iter()
            .find(|p| p.object == object && p.action == action)
            .cloned())
    }

    async fn create_permission(
        &self,
        object: &str,
        action: &str,
        description: Option<&str>,
    ) -> Result<Permission, RepositoryError> {
        let mut tables = self.tables.write();
        if tables.permissions.iter().any(|p| p.object == object && p.action == action) {
            return Err(RepositoryError::Conflict(format!(
                "permission {} {} already exists",
                action, object
            )));
        }
        tables.next_permission_id += 1;
        let permission = Permission {
            id: PermissionId(tables.next_permission_id),
            object: object.to_string(),
            action: action.to_string(),
            description: description.map(str::to_string),
        };
        tables.permissions.push(permission.clone());
        Ok(permission)
    }

    async fn link(&self, role: RoleId, permission: PermissionId) -> Result<bool, RepositoryError> {
        let mut tables = self.tables.write();
        if !tables.roles.iter().any(|r| r.id == role) {
            return Err(RepositoryError::NotFound(format!("role {}", role)));
        }
        if !tables.permissions.iter().any(|p| p.id == permission) {
            return Err(RepositoryError::NotFound(format!("permission {}", permission)));
        }
        if tables
            .links
            .iter()
            .any(|l| l.role_id == role && l.permission_id == permission)
        {
            return Ok(false);
        }
        tables.next_link_id += 1;
        let id = tables.next_link_id;
        tables.links.push(RolePermission {
            id,
            role_id: role,
            permission_id: permission,
        });
        Ok(true)
    }

    async fn delete_all_role_permissions(&self) -> Result<u64, RepositoryError> {
        let mut tables = self.tables.write();
        let removed = tables.links.len() as u64;
        tables.links.clear();
        Ok(removed)
    }

    async fn delete_all_permissions(&self) -> Result<u64, RepositoryError> {
        let mut tables = self.tables.write();
        if !tables.links.is_empty() {
            return Err(RepositoryError::Conflict(
                "permissions are still referenced by role_permissions".to_string(),
            ));
        }
        let removed = tables.permissions.len() as u64;
        tables.permissions.clear();
        Ok(removed)
    }

    async fn delete_all_roles(&self) -> Result<u64, RepositoryError> {
        let mut tables = self.tables.write();
        if !tables.links.is_empty() {
            return Err(RepositoryError::Conflict(
                "roles are still referenced by role_permissions".to_string(),
            ));
        }
        let removed = tables.roles.len() as u64;
        tables.roles.clear();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::app::{ScaleBounds, ServiceDefinition};

    fn draft(name: &str) -> AppDraft {
        AppDraft {
            name: name.to_string(),
            services: vec![ServiceDefinition::new("web", "nginx")],
            hosts: vec![],
            scale: ScaleBounds::default(),
            force_stop: false,
        }
    }

    #[tokio::test]
    async fn test_app_ids_and_ownership_scoping() {
        let repo = InMemoryAppRepository::starting_after(6);
        let demo = repo.create(&draft("demo"), UserId(1)).await.unwrap();
        let other = repo.create(&draft("other"), UserId(2)).await.unwrap();

        assert_eq!(demo.id, AppId(7));
        assert_eq!(other.id, AppId(8));

        assert!(repo.find_by_id(demo.id, Some(UserId(2))).await.unwrap().is_none());
        assert!(repo.find_by_id(demo.id, None).await.unwrap().is_some());
        assert_eq!(repo.list(Some(UserId(1)), 0, 10).await.unwrap().len(), 1);
        assert_eq!(repo.list(None, 1, 10).await.unwrap()[0].id, other.id);

        assert!(!repo.delete(demo.id, Some(UserId(2))).await.unwrap());
        assert!(repo.delete(demo.id, Some(UserId(1))).await.unwrap());
        assert!(repo.find_by_id(demo.id, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let repo = InMemoryAppRepository::new();
        let app = repo.create(&draft("demo"), UserId(1)).await.unwrap();
        repo.delete(app.id, None).await.unwrap();

        assert!(matches!(repo.update(&app).await, Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rbac_links_are_unique() {
        let repo = InMemoryRbacRepository::new();
        let admin = repo.create_role("admin", true).await.unwrap();
        let get_apps = repo.create_permission("APPS", "GET", None).await.unwrap();

        assert!(repo.link(admin.id, get_apps.id).await.unwrap());
        assert!(!repo.link(admin.id, get_apps.id).await.unwrap());
        assert_eq!(repo.permissions_for_role(admin.id).await.unwrap(), vec![get_apps]);
        assert!(matches!(
            repo.create_permission("APPS", "GET", Some("dup")).await,
            Err(RepositoryError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_wipe_order_is_enforced() {
        let repo = InMemoryRbacRepository::new();
        let admin = repo.create_role("admin", false).await.unwrap();
        let perm = repo.create_permission("APPS", "GET", None).await.unwrap();
        repo.link(admin.id, perm.id).await.unwrap();

        assert!(repo.delete_all_roles().await.is_err());
        assert_eq!(repo.delete_all_role_permissions().await.unwrap(), 1);
        assert_eq!(repo.delete_all_permissions().await.unwrap(), 1);
        assert_eq!(repo.delete_all_roles().await.unwrap(), 1);
        assert!(repo.list_roles().await.unwrap().is_empty());
    }
}
