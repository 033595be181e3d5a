// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete repository implementations based on storage backend
//! configuration, keeping the domain layer free of infrastructure types.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::domain::repository::{AppRepository, RbacRepository, StorageBackend};
use crate::infrastructure::db::Database;
use crate::infrastructure::repositories::postgres_app::PostgresAppRepository;
use crate::infrastructure::repositories::postgres_rbac::PostgresRbacRepository;
use crate::infrastructure::repositories::{InMemoryAppRepository, InMemoryRbacRepository};

/// Both repositories, backed by the same store.
#[derive(Clone)]
pub struct Repositories {
    pub apps: Arc<dyn AppRepository>,
    pub rbac: Arc<dyn RbacRepository>,
}

/// Connect to the configured backend and build every repository on top of it.
pub async fn create_repositories(backend: &StorageBackend) -> Result<Repositories> {
    match backend {
        StorageBackend::InMemory => Ok(Repositories {
            apps: Arc::new(InMemoryAppRepository::new()),
            rbac: Arc::new(InMemoryRbacRepository::new()),
        }),
        StorageBackend::PostgreSQL(config) => {
            let database = Database::new(config)
                .await
                .context("Failed to connect to PostgreSQL")?;
            let pool = database.get_pool().clone();
            Ok(Repositories {
                apps: Arc::new(PostgresAppRepository::new(pool.clone())),
                rbac: Arc::new(PostgresRbacRepository::new(pool)),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::app::{AppDraft, ScaleBounds, ServiceDefinition, UserId};

    #[tokio::test]
    async fn test_in_memory_backend() {
        let repositories = create_repositories(&StorageBackend::InMemory).await.unwrap();
        let draft = AppDraft {
            name: "demo".to_string(),
            services: vec![ServiceDefinition::new("web", "x")],
            hosts: vec![],
            scale: ScaleBounds::default(),
            force_stop: false,
        };

        let app = repositories.apps.create(&draft, UserId(1)).await.unwrap();
        assert_eq!(repositories.apps.list(Some(UserId(1)), 0, 10).await.unwrap(), vec![app]);
        assert!(repositories.rbac.list_roles().await.unwrap().is_empty());
    }
}
