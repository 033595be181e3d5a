// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Policy Synthesizer Application Service
//!
//! Forward sync: role/permission snapshot → rule-set document → new file on
//! disk → forced push to the decision service.
//!
//! Reverse seed: rule-set file → parsed mapping → store rows. Seeding wipes
//! every role, permission and link before repopulating, so it is meant for
//! bootstrap or full resync while nothing else is writing to those tables.

use crate::domain::events::PolicyEvent;
use crate::domain::policy::{AuthorizationInput, PolicyError, PolicyPublisher, PushReceipt};
use crate::domain::rbac::{PermissionGrant, RoleGrants, RolePermissionMap};
use crate::domain::repository::{RbacRepository, RepositoryError};
use crate::domain::rule_set::{schema, RuleSetDocument, RuleSetError};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::rule_file::{RuleFileError, RuleSetFileWriter};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PolicySyncError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    RuleSet(#[from] RuleSetError),

    #[error(transparent)]
    RuleFile(#[from] RuleFileError),

    #[error(transparent)]
    Policy(#[from] PolicyError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReceipt {
    pub path: PathBuf,
    pub policy_name: String,
    pub push: PushReceipt,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeedSummary {
    pub removed_links: u64,
    pub removed_permissions: u64,
    pub removed_roles: u64,
    pub roles_created: usize,
    pub permissions_created: usize,
    pub links_created: usize,
}

pub struct PolicySynthesizer {
    repository: Arc<dyn RbacRepository>,
    writer: RuleSetFileWriter,
    publisher: Arc<dyn PolicyPublisher>,
    policy_name: String,
    event_bus: Arc<EventBus>,
}

impl PolicySynthesizer {
    pub fn new(
        repository: Arc<dyn RbacRepository>,
        writer: RuleSetFileWriter,
        publisher: Arc<dyn PolicyPublisher>,
        policy_name: impl Into<String>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            repository,
            writer,
            publisher,
            policy_name: policy_name.into(),
            event_bus,
        }
    }

    pub fn policy_name(&self) -> &str {
        &self.policy_name
    }

    /// Current role → grants mapping, roles in store order.
    pub async fn snapshot(&self) -> Result<RolePermissionMap, PolicySyncError> {
        let roles = self.repository.list_roles().await?;
        let mut entries = Vec::with_capacity(roles.len());
        for role in roles {
            let permissions = self.repository.permissions_for_role(role.id).await?;
            entries.push(RoleGrants::new(
                role.name,
                permissions.iter().map(PermissionGrant::from).collect(),
            ));
        }
        Ok(entries)
    }

    /// Render the store into a new rule-set file and force-push it.
    pub async fn publish_from_store(&self) -> Result<PublishReceipt, PolicySyncError> {
        let entries = self.snapshot().await?;
        let roles = entries.len();
        let text = RuleSetDocument::new(entries).render();

        let path = self.writer.write(&text).await?;
        info!(path = %path.display(), roles, "Generated rule-set from store");
        self.event_bus.publish_policy_event(PolicyEvent::RuleSetWritten {
            path: path.clone(),
            roles,
            written_at: Utc::now(),
        });

        let push = self.push(&path, true).await?;
        Ok(PublishReceipt {
            path,
            policy_name: self.policy_name.clone(),
            push,
        })
    }

    /// Push an existing rule-set file as is.
    pub async fn publish_file(&self, path: &Path, force: bool) -> Result<PushReceipt, PolicySyncError> {
        Ok(self.push(path, force).await?)
    }

    async fn push(&self, path: &Path, force: bool) -> Result<PushReceipt, PolicyError> {
        match self.publisher.push(&self.policy_name, path, force).await {
            Ok(receipt) => {
                metrics::counter!("crane_policy_publications_total", "outcome" => "success").increment(1);
                info!(policy_name = %self.policy_name, path = %path.display(), "Policy published");
                self.event_bus.publish_policy_event(PolicyEvent::PolicyPublished {
                    policy_name: self.policy_name.clone(),
                    path: path.to_path_buf(),
                    published_at: Utc::now(),
                });
                Ok(receipt)
            }
            Err(e) => {
                metrics::counter!("crane_policy_publications_total", "outcome" => "error").increment(1);
                warn!(policy_name = %self.policy_name, error = %e, "Policy publication failed");
                self.event_bus.publish_policy_event(PolicyEvent::PolicyPublishFailed {
                    policy_name: self.policy_name.clone(),
                    error: e.to_string(),
                    failed_at: Utc::now(),
                });
                Err(e)
            }
        }
    }

    /// Replace every role, permission and link with the contents of `path`.
    ///
    /// The file is parsed before anything is removed, so a malformed document
    /// leaves the store as it was.
    pub async fn seed_store_from_file(&self, path: &Path) -> Result<SeedSummary, PolicySyncError> {
        let text = tokio::fs::read_to_string(path).await.map_err(|source| RuleSetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let document = RuleSetDocument::parse(&text).map_err(|source| RuleSetError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let mut summary = SeedSummary {
            removed_links: self.repository.delete_all_role_permissions().await?,
            removed_permissions: self.repository.delete_all_permissions().await?,
            removed_roles: self.repository.delete_all_roles().await?,
            ..SeedSummary::default()
        };
        debug!(
            links = summary.removed_links,
            permissions = summary.removed_permissions,
            roles = summary.removed_roles,
            "Cleared role/permission tables"
        );

        for entry in &document.entries {
            let role = match self.repository.find_role_by_name(&entry.role).await? {
                Some(role) => role,
                None => {
                    summary.roles_created += 1;
                    self.repository.create_role(&entry.role, true).await?
                }
            };

            for grant in &entry.grants {
                let permission = match self.repository.find_permission(&grant.object, &grant.action).await? {
                    Some(permission) => permission,
                    None => {
                        summary.permissions_created += 1;
                        self.repository
                            .create_permission(&grant.object, &grant.action, grant.description.as_deref())
                            .await?
                    }
                };
                if self.repository.link(role.id, permission.id).await? {
                    summary.links_created += 1;
                }
            }
        }

        info!(
            source = %path.display(),
            roles = summary.roles_created,
            permissions = summary.permissions_created,
            links = summary.links_created,
            "Seeded store from rule-set"
        );
        self.event_bus.publish_policy_event(PolicyEvent::StoreSeeded {
            source: path.to_path_buf(),
            roles: summary.roles_created,
            permissions: summary.permissions_created,
            links: summary.links_created,
            seeded_at: Utc::now(),
        });
        Ok(summary)
    }

    /// Ask the decision service whether `input` is allowed by the active policy.
    pub async fn check(&self, input: &AuthorizationInput) -> Result<bool, PolicySyncError> {
        Ok(self.publisher.is_allowed(&schema::decision_path(), input).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::event_bus::DomainEvent;
    use crate::infrastructure::opa::MockPolicyPublisher;
    use crate::infrastructure::repositories::InMemoryRbacRepository;

    struct Harness {
        synthesizer: PolicySynthesizer,
        repository: InMemoryRbacRepository,
        publisher: MockPolicyPublisher,
        event_bus: Arc<EventBus>,
        dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let repository = InMemoryRbacRepository::new();
        let publisher = MockPolicyPublisher::new();
        let event_bus = Arc::new(EventBus::new(64));
        let synthesizer = PolicySynthesizer::new(
            Arc::new(repository.clone()),
            RuleSetFileWriter::new(dir.path().join("policies")),
            Arc::new(publisher.clone()),
            "rbac",
            event_bus.clone(),
        );
        Harness {
            synthesizer,
            repository,
            publisher,
            event_bus,
            dir,
        }
    }

    async fn seed_admin(repository: &InMemoryRbacRepository) {
        let admin = repository.create_role("admin", true).await.unwrap();
        for action in ["GET", "DELETE"] {
            let permission = repository.create_permission("APPS", action, None).await.unwrap();
            repository.link(admin.id, permission.id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_admin_publish_forces_push_of_written_file() {
        let h = harness();
        seed_admin(&h.repository).await;

        let receipt = h.synthesizer.publish_from_store().await.unwrap();

        let text = std::fs::read_to_string(&receipt.path).unwrap();
        assert!(text.starts_with("package rbac.authz\n\nimport rego.v1\n\nrole_permissions := {\n"));
        assert!(text.contains("    \"admin\": [\n        {\"action\": \"GET\", \"object\": \"APPS\"},\n"));
        assert!(text.contains("        {\"action\": \"DELETE\", \"object\": \"APPS\"},\n"));
        assert!(text.contains("default allow := false"));

        let pushes = h.publisher.pushes();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].policy_name, "rbac");
        assert!(pushes[0].force);
        assert_eq!(pushes[0].path, receipt.path);
        assert_eq!(pushes[0].document, text);
        assert_eq!(receipt.push.status, 200);
    }

    #[tokio::test]
    async fn test_republish_writes_a_new_file() {
        let h = harness();
        seed_admin(&h.repository).await;

        let first = h.synthesizer.publish_from_store().await.unwrap();
        let second = h.synthesizer.publish_from_store().await.unwrap();

        assert_ne!(first.path, second.path);
        assert!(first.path.exists());
        assert_eq!(h.publisher.pushes().len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_service_propagates() {
        let h = harness();
        seed_admin(&h.repository).await;
        h.publisher.set_unavailable(true);
        let mut events = h.event_bus.subscribe();

        let result = h.synthesizer.publish_from_store().await;

        assert!(matches!(
            result,
            Err(PolicySyncError::Policy(PolicyError::ServiceUnavailable(_)))
        ));
        let failed = events
            .drain()
            .into_iter()
            .any(|e| matches!(e, DomainEvent::Policy(PolicyEvent::PolicyPublishFailed { .. })));
        assert!(failed);
    }

    #[tokio::test]
    async fn test_seed_round_trips_published_file() {
        let h = harness();
        seed_admin(&h.repository).await;
        let viewer = h.repository.create_role("viewer", false).await.unwrap();
        let get_apps = h.repository.find_permission("APPS", "GET").await.unwrap().unwrap();
        h.repository.link(viewer.id, get_apps.id).await.unwrap();
        let before = h.synthesizer.snapshot().await.unwrap();
        let receipt = h.synthesizer.publish_from_store().await.unwrap();

        let summary = h.synthesizer.seed_store_from_file(&receipt.path).await.unwrap();

        assert_eq!(summary.removed_roles, 2);
        assert_eq!(summary.removed_links, 3);
        assert_eq!(summary.roles_created, 2);
        // GET APPS is shared between admin and viewer
        assert_eq!(summary.permissions_created, 2);
        assert_eq!(summary.links_created, 3);
        assert_eq!(h.synthesizer.snapshot().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_malformed_seed_file_leaves_store_untouched() {
        let h = harness();
        seed_admin(&h.repository).await;
        let path = h.dir.path().join("broken.rego");
        std::fs::write(
            &path,
            "package rbac.authz\n\nrole_permissions := {\n    \"admin\": [\n        {\"action\": \"GET\"},\n    ],\n}\n",
        )
        .unwrap();

        let result = h.synthesizer.seed_store_from_file(&path).await;

        match result {
            Err(PolicySyncError::RuleSet(RuleSetError::Parse { source, .. })) => assert_eq!(source.line, 5),
            other => panic!("expected parse error, got {:?}", other),
        }
        assert_eq!(h.repository.link_count(), 2);
    }

    #[tokio::test]
    async fn test_check_queries_decision_rule() {
        let h = harness();
        h.publisher.set_verdict(true);
        let input = AuthorizationInput {
            roles: vec!["admin".to_string()],
            action: "GET".to_string(),
            object: "APPS".to_string(),
        };
        assert!(h.synthesizer.check(&input).await.unwrap());
    }
}
