// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Deployment Orchestrator Application Service
//!
//! Drives an App through its lifecycle, coordinating:
//! - Domain layer: App aggregate, descriptor builder, runtime and monitoring contracts
//! - Infrastructure layer: AppRepository, DeploymentRuntime, MonitoringRegistrar
//! - Event bus: Publishing DeploymentEvents for observability
//!
//! Every operation is a fixed sequence of steps. The first failing step
//! aborts the rest and its error is returned unchanged; completed steps are
//! not rolled back. The row is only rewritten after the runtime side has
//! succeeded, and only deleted after teardown.
//!
//! Callers serialize operations on the same App.

use crate::application::route_discovery::{discover_route, RouteDiscovery};
use crate::domain::app::{App, AppDraft, AppId, AppUpdate, AppWithRuntime, ProxyRoute, UserId, ValidationError};
use crate::domain::compose::{build_descriptor, ComposeDescriptor, ComposeSettings};
use crate::domain::events::{DeploymentEvent, DeploymentPhase};
use crate::domain::monitoring::{MonitoringError, MonitoringRegistrar};
use crate::domain::repository::{AppRepository, RepositoryError};
use crate::domain::runtime::{ContainerUsage, DeploymentRuntime, RuntimeError};
use crate::infrastructure::event_bus::EventBus;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Page size used when walking every app for a scrape refresh
const REFRESH_PAGE_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("Invalid app definition: {0}")]
    Validation(#[from] ValidationError),

    #[error("App {0} not found")]
    NotFound(AppId),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Monitoring(#[from] MonitoringError),
}

// ============================================================================
// Service Trait
// ============================================================================

/// `user = None` means unscoped (administrative) access; otherwise only rows
/// owned by that user are visible.
#[async_trait]
pub trait DeploymentService: Send + Sync {
    /// Persist, build and start a new app, then register it with monitoring.
    async fn create(&self, draft: AppDraft, owner: UserId) -> Result<AppWithRuntime, DeploymentError>;

    /// Clone desired state into a new row owned by `target`. No runtime call.
    async fn copy(&self, id: AppId, user: Option<UserId>, target: UserId) -> Result<App, DeploymentError>;

    async fn start(&self, id: AppId, user: Option<UserId>) -> Result<(), DeploymentError>;

    /// Run `count` replicas of every service. The row is not rewritten.
    async fn scale(&self, id: AppId, user: Option<UserId>, count: u32) -> Result<(), DeploymentError>;

    /// Merge `update` into the row. No runtime call.
    async fn update(&self, id: AppId, user: Option<UserId>, update: AppUpdate) -> Result<App, DeploymentError>;

    async fn restart(&self, id: AppId, user: Option<UserId>) -> Result<(), DeploymentError>;

    async fn stop(&self, id: AppId, user: Option<UserId>) -> Result<(), DeploymentError>;

    /// Tear down the deployment, then hard-delete the row.
    async fn delete(&self, id: AppId, user: Option<UserId>) -> Result<(), DeploymentError>;

    async fn logs(&self, id: AppId, user: Option<UserId>) -> Result<String, DeploymentError>;

    async fn stats(&self, id: AppId, user: Option<UserId>) -> Result<Vec<ContainerUsage>, DeploymentError>;

    async fn get_app_with_runtime(&self, id: AppId, user: Option<UserId>) -> Result<AppWithRuntime, DeploymentError>;

    async fn list_apps_with_runtime(
        &self,
        user: Option<UserId>,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<AppWithRuntime>, DeploymentError>;

    /// Re-register every app that has a route, then reload monitoring once.
    /// Returns the number of registered targets.
    async fn refresh_scrape_targets(&self) -> Result<usize, DeploymentError>;
}

// ============================================================================
// Standard Implementation
// ============================================================================

pub struct StandardDeploymentService {
    repository: Arc<dyn AppRepository>,
    runtime: Arc<dyn DeploymentRuntime>,
    monitoring: Arc<dyn MonitoringRegistrar>,
    event_bus: Arc<EventBus>,
    settings: ComposeSettings,
}

impl StandardDeploymentService {
    pub fn new(
        repository: Arc<dyn AppRepository>,
        runtime: Arc<dyn DeploymentRuntime>,
        monitoring: Arc<dyn MonitoringRegistrar>,
        event_bus: Arc<EventBus>,
        settings: ComposeSettings,
    ) -> Self {
        Self {
            repository,
            runtime,
            monitoring,
            event_bus,
            settings,
        }
    }

    async fn load(&self, id: AppId, user: Option<UserId>) -> Result<App, DeploymentError> {
        self.repository
            .find_by_id(id, user)
            .await?
            .ok_or(DeploymentError::NotFound(id))
    }

    fn descriptor(&self, app: &App) -> Result<ComposeDescriptor, DeploymentError> {
        Ok(build_descriptor(app, &self.settings)?)
    }

    async fn discover(&self, app: &App) -> Result<RouteDiscovery, DeploymentError> {
        let deployment = app.deployment_name();
        let discovery = discover_route(&deployment, self.runtime.as_ref(), &self.settings).await?;
        self.event_bus.publish_deployment_event(DeploymentEvent::RouteDiscovered {
            app_id: app.id,
            deployment,
            address: discovery.route.address.clone(),
            status: discovery.route.status,
            discovered_at: Utc::now(),
        });
        Ok(discovery)
    }

    fn transition(&self, app: &App, from: DeploymentPhase, to: DeploymentPhase) {
        debug!(app_id = %app.id, %from, %to, "Deployment phase changed");
        self.event_bus.publish_deployment_event(DeploymentEvent::PhaseChanged {
            app_id: app.id,
            deployment: app.deployment_name(),
            from,
            to,
            changed_at: Utc::now(),
        });
    }

    /// Record a failed step and hand the error back for propagation.
    fn failed(&self, app: &App, operation: &'static str, error: impl Into<DeploymentError>) -> DeploymentError {
        let error = error.into();
        warn!(app_id = %app.id, deployment = %app.deployment_name(), operation, error = %error, "Deployment operation failed");
        metrics::counter!("crane_deployment_operations_total", "operation" => operation, "outcome" => "error")
            .increment(1);
        self.event_bus.publish_deployment_event(DeploymentEvent::OperationFailed {
            app_id: app.id,
            deployment: app.deployment_name(),
            operation: operation.to_string(),
            error: error.to_string(),
            failed_at: Utc::now(),
        });
        error
    }

    fn succeeded(&self, operation: &'static str) {
        metrics::counter!("crane_deployment_operations_total", "operation" => operation, "outcome" => "success")
            .increment(1);
    }

    /// Build then start; a failure moves the deployment to `Failed`.
    async fn build_and_up(
        &self,
        app: &App,
        descriptor: &ComposeDescriptor,
        operation: &'static str,
        from: DeploymentPhase,
    ) -> Result<(), DeploymentError> {
        self.transition(app, from, DeploymentPhase::Building);
        if let Err(e) = self.runtime.build(descriptor).await {
            self.transition(app, DeploymentPhase::Building, DeploymentPhase::Failed);
            return Err(self.failed(app, operation, e));
        }
        if let Err(e) = self.runtime.up(descriptor, true, None).await {
            self.transition(app, DeploymentPhase::Building, DeploymentPhase::Failed);
            return Err(self.failed(app, operation, e));
        }
        self.transition(app, DeploymentPhase::Building, DeploymentPhase::Running);
        Ok(())
    }

    fn with_runtime(app: App, route: ProxyRoute) -> AppWithRuntime {
        AppWithRuntime {
            deployment_name: app.deployment_name(),
            app,
            route,
        }
    }
}

#[async_trait]
impl DeploymentService for StandardDeploymentService {
    async fn create(&self, draft: AppDraft, owner: UserId) -> Result<AppWithRuntime, DeploymentError> {
        draft.validate()?;
        self.settings.check_service_names(&draft.services)?;

        let mut app = self.repository.create(&draft, owner).await?;
        let deployment = app.deployment_name();
        info!(app_id = %app.id, deployment = %deployment, user_id = %owner, "Creating app deployment");
        self.transition(&app, DeploymentPhase::Absent, DeploymentPhase::Created);

        let descriptor = self.descriptor(&app).map_err(|e| self.failed(&app, "create", e))?;
        self.build_and_up(&app, &descriptor, "create", DeploymentPhase::Created)
            .await?;

        let discovery = self.discover(&app).await.map_err(|e| self.failed(&app, "create", e))?;

        app.hosts = descriptor.host_routes();
        app.updated_at = Utc::now();
        self.repository
            .update(&app)
            .await
            .map_err(|e| self.failed(&app, "create", e))?;

        match discovery.route.address.as_deref() {
            Some(address) => {
                self.monitoring
                    .register_scrape_target(&deployment, address)
                    .await
                    .map_err(|e| self.failed(&app, "create", e))?;
            }
            None => warn!(
                app_id = %app.id,
                deployment = %deployment,
                diagnosis = ?discovery.diagnosis,
                "No route found after start; skipping scrape target registration"
            ),
        }
        self.monitoring
            .reload()
            .await
            .map_err(|e| self.failed(&app, "create", e))?;
        self.runtime
            .cleanup(&deployment)
            .await
            .map_err(|e| self.failed(&app, "create", e))?;

        self.succeeded("create");
        info!(app_id = %app.id, deployment = %deployment, status = %discovery.route.status, "App deployment created");
        Ok(Self::with_runtime(app, discovery.route))
    }

    async fn copy(&self, id: AppId, user: Option<UserId>, target: UserId) -> Result<App, DeploymentError> {
        let source = self.load(id, user).await?;
        let draft = source.copy_draft();
        draft.validate()?;
        self.settings.check_service_names(&draft.services)?;

        let copy = self.repository.create(&draft, target).await?;
        info!(source_id = %id, app_id = %copy.id, user_id = %target, "Copied app");
        self.transition(&copy, DeploymentPhase::Absent, DeploymentPhase::Created);
        self.succeeded("copy");
        Ok(copy)
    }

    async fn start(&self, id: AppId, user: Option<UserId>) -> Result<(), DeploymentError> {
        let app = self.load(id, user).await?;
        let descriptor = self.descriptor(&app).map_err(|e| self.failed(&app, "start", e))?;
        info!(app_id = %id, deployment = %descriptor.project, "Starting app");

        self.build_and_up(&app, &descriptor, "start", DeploymentPhase::Stopped)
            .await?;
        self.runtime
            .cleanup(&descriptor.project)
            .await
            .map_err(|e| self.failed(&app, "start", e))?;

        self.succeeded("start");
        Ok(())
    }

    async fn scale(&self, id: AppId, user: Option<UserId>, count: u32) -> Result<(), DeploymentError> {
        let app = self.load(id, user).await?;
        app.scale.check(count)?;

        let descriptor = self.descriptor(&app).map_err(|e| self.failed(&app, "scale", e))?;
        let scales = descriptor.uniform_scale(count);
        info!(app_id = %id, deployment = %descriptor.project, replicas = count, "Scaling app");

        self.transition(&app, DeploymentPhase::Running, DeploymentPhase::Scaling);
        if let Err(e) = self.runtime.up(&descriptor, true, Some(&scales)).await {
            self.transition(&app, DeploymentPhase::Scaling, DeploymentPhase::Failed);
            return Err(self.failed(&app, "scale", e));
        }
        self.event_bus.publish_deployment_event(DeploymentEvent::Scaled {
            app_id: app.id,
            deployment: descriptor.project.clone(),
            replicas: count,
            scaled_at: Utc::now(),
        });
        self.transition(&app, DeploymentPhase::Scaling, DeploymentPhase::Running);

        self.succeeded("scale");
        Ok(())
    }

    async fn update(&self, id: AppId, user: Option<UserId>, update: AppUpdate) -> Result<App, DeploymentError> {
        let mut app = self.load(id, user).await?;
        app.apply_update(update)?;
        self.settings.check_service_names(&app.services)?;
        self.repository.update(&app).await?;

        info!(app_id = %id, "Updated app desired state");
        self.succeeded("update");
        Ok(app)
    }

    async fn restart(&self, id: AppId, user: Option<UserId>) -> Result<(), DeploymentError> {
        let app = self.load(id, user).await?;
        let descriptor = self.descriptor(&app).map_err(|e| self.failed(&app, "restart", e))?;
        info!(app_id = %id, deployment = %descriptor.project, "Restarting app");

        self.runtime
            .restart(&descriptor)
            .await
            .map_err(|e| self.failed(&app, "restart", e))?;

        self.succeeded("restart");
        Ok(())
    }

    async fn stop(&self, id: AppId, user: Option<UserId>) -> Result<(), DeploymentError> {
        let app = self.load(id, user).await?;
        let descriptor = self.descriptor(&app).map_err(|e| self.failed(&app, "stop", e))?;
        info!(app_id = %id, deployment = %descriptor.project, "Stopping app");

        self.runtime
            .stop(&descriptor)
            .await
            .map_err(|e| self.failed(&app, "stop", e))?;
        self.transition(&app, DeploymentPhase::Running, DeploymentPhase::Stopped);
        self.runtime
            .cleanup(&descriptor.project)
            .await
            .map_err(|e| self.failed(&app, "stop", e))?;

        self.succeeded("stop");
        Ok(())
    }

    async fn delete(&self, id: AppId, user: Option<UserId>) -> Result<(), DeploymentError> {
        let app = self.load(id, user).await?;
        let descriptor = self.descriptor(&app).map_err(|e| self.failed(&app, "delete", e))?;
        info!(app_id = %id, deployment = %descriptor.project, "Deleting app");

        self.runtime
            .down(&descriptor)
            .await
            .map_err(|e| self.failed(&app, "delete", e))?;
        self.runtime
            .cleanup(&descriptor.project)
            .await
            .map_err(|e| self.failed(&app, "delete", e))?;
        self.monitoring
            .unregister_scrape_target(&descriptor.project)
            .await
            .map_err(|e| self.failed(&app, "delete", e))?;
        self.monitoring
            .reload()
            .await
            .map_err(|e| self.failed(&app, "delete", e))?;

        if !self.repository.delete(id, user).await? {
            // Row vanished between load and delete
            return Err(DeploymentError::NotFound(id));
        }
        self.transition(&app, DeploymentPhase::Stopped, DeploymentPhase::Removed);

        self.succeeded("delete");
        Ok(())
    }

    async fn logs(&self, id: AppId, user: Option<UserId>) -> Result<String, DeploymentError> {
        let app = self.load(id, user).await?;
        let descriptor = self.descriptor(&app)?;
        Ok(self.runtime.logs(&descriptor).await?)
    }

    async fn stats(&self, id: AppId, user: Option<UserId>) -> Result<Vec<ContainerUsage>, DeploymentError> {
        let app = self.load(id, user).await?;
        Ok(self.runtime.stats(&app.deployment_name()).await?)
    }

    async fn get_app_with_runtime(&self, id: AppId, user: Option<UserId>) -> Result<AppWithRuntime, DeploymentError> {
        let app = self.load(id, user).await?;
        let discovery = self.discover(&app).await?;
        Ok(Self::with_runtime(app, discovery.route))
    }

    async fn list_apps_with_runtime(
        &self,
        user: Option<UserId>,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<AppWithRuntime>, DeploymentError> {
        let apps = self.repository.list(user, skip, limit).await?;
        let discoveries =
            futures::future::try_join_all(apps.iter().map(|app| self.discover(app))).await?;

        Ok(apps
            .into_iter()
            .zip(discoveries)
            .map(|(app, discovery)| Self::with_runtime(app, discovery.route))
            .collect())
    }

    async fn refresh_scrape_targets(&self) -> Result<usize, DeploymentError> {
        let mut registered = 0;
        let mut skip = 0;
        loop {
            let page = self.repository.list(None, skip, REFRESH_PAGE_SIZE).await?;
            if page.is_empty() {
                break;
            }
            skip += page.len();

            for app in &page {
                let discovery = self.discover(app).await?;
                let Some(address) = discovery.route.address.as_deref() else {
                    continue;
                };
                self.monitoring
                    .register_scrape_target(&app.deployment_name(), address)
                    .await?;
                registered += 1;
            }
        }
        self.monitoring.reload().await?;

        info!(registered, "Refreshed scrape targets");
        self.event_bus
            .publish_deployment_event(DeploymentEvent::ScrapeTargetsRefreshed {
                registered,
                refreshed_at: Utc::now(),
            });
        self.succeeded("refresh_scrape_targets");
        Ok(registered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::app::{RouteStatus, ScaleBounds, ServiceDefinition};
    use crate::domain::compose::ProxySettings;
    use crate::infrastructure::event_bus::DomainEvent;
    use crate::infrastructure::monitoring::MockMonitoringRegistrar;
    use crate::infrastructure::repositories::InMemoryAppRepository;
    use crate::infrastructure::runtime::{CallJournal, MockDeploymentRuntime};

    struct Harness {
        service: StandardDeploymentService,
        repository: InMemoryAppRepository,
        runtime: MockDeploymentRuntime,
        monitoring: MockMonitoringRegistrar,
        journal: CallJournal,
        event_bus: Arc<EventBus>,
    }

    fn harness() -> Harness {
        let journal = CallJournal::new();
        let repository = InMemoryAppRepository::starting_after(6);
        let runtime = MockDeploymentRuntime::with_journal(journal.clone());
        let monitoring = MockMonitoringRegistrar::with_journal(journal.clone());
        let event_bus = Arc::new(EventBus::new(256));
        let service = StandardDeploymentService::new(
            Arc::new(repository.clone()),
            Arc::new(runtime.clone()),
            Arc::new(monitoring.clone()),
            event_bus.clone(),
            ComposeSettings {
                network: "crane".to_string(),
                proxy: Some(ProxySettings::default()),
            },
        );
        Harness {
            service,
            repository,
            runtime,
            monitoring,
            journal,
            event_bus,
        }
    }

    fn demo_draft() -> AppDraft {
        let mut web = ServiceDefinition::new("web", "nginx:1.27");
        web.port = Some(80);
        AppDraft {
            name: "demo".to_string(),
            services: vec![web],
            hosts: vec![],
            scale: ScaleBounds::new(1, 1, 3).unwrap(),
            force_stop: false,
        }
    }

    #[tokio::test]
    async fn test_create_registers_monitoring_after_discovery() {
        let h = harness();
        let created = h.service.create(demo_draft(), UserId(1)).await.unwrap();

        assert_eq!(created.app.id, AppId(7));
        assert_eq!(created.deployment_name, "demo-7");
        assert_eq!(created.route.status, RouteStatus::Running);
        assert!(created.route.address.is_some());

        let up = h.journal.position("runtime.up demo-7").unwrap();
        let register = h.journal.position("monitoring.register demo-7").unwrap();
        let reload = h.journal.position("monitoring.reload").unwrap();
        let cleanup = h.journal.position("runtime.cleanup demo-7").unwrap();
        assert!(h.journal.position("runtime.build demo-7").unwrap() < up);
        assert!(up < register);
        assert!(register < reload);
        assert!(reload < cleanup);

        // Derived default host is persisted on the row
        let row = h.repository.find_by_id(AppId(7), None).await.unwrap().unwrap();
        assert_eq!(row.hosts.len(), 1);
        assert_eq!(row.hosts[0].host, "web.demo-7.localhost");
    }

    #[tokio::test]
    async fn test_create_without_route_skips_registration_but_reloads() {
        let h = harness();
        h.runtime.hide_proxy(true);

        let created = h.service.create(demo_draft(), UserId(1)).await.unwrap();

        assert_eq!(created.route.status, RouteStatus::Stopped);
        assert!(h.monitoring.targets().is_empty());
        assert_eq!(h.monitoring.reload_count(), 1);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_draft_before_any_call() {
        let h = harness();
        let mut draft = demo_draft();
        draft.scale = ScaleBounds { min: 2, current: 1, max: 3 };

        let result = h.service.create(draft, UserId(1)).await;

        assert!(matches!(result, Err(DeploymentError::Validation(_))));
        assert!(h.journal.entries().is_empty());
        assert!(h.repository.list(None, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_rejects_compose_invalid_names_before_persisting() {
        let h = harness();
        let mut draft = demo_draft();
        draft.name = "My App".to_string();
        draft.services[0].name = "Web Server".to_string();

        let result = h.service.create(draft, UserId(1)).await;

        assert!(matches!(
            result,
            Err(DeploymentError::Validation(ValidationError::InvalidAppName(_)))
        ));
        assert!(h.journal.entries().is_empty());
        assert!(h.repository.list(None, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_service_named_after_proxy_is_rejected() {
        let h = harness();
        let mut draft = demo_draft();
        draft.services.push(ServiceDefinition::new("traefik", "my/custom-gateway:1"));

        let result = h.service.create(draft, UserId(1)).await;

        assert!(matches!(
            result,
            Err(DeploymentError::Validation(ValidationError::ReservedServiceName(_)))
        ));
        assert!(h.journal.entries().is_empty());
        assert!(h.repository.list(None, 0, 10).await.unwrap().is_empty());

        // The same name cannot be introduced later through an update
        let created = h.service.create(demo_draft(), UserId(1)).await.unwrap();
        let update = AppUpdate {
            services: Some(vec![ServiceDefinition::new("traefik", "my/custom-gateway:1")]),
            hosts: Some(vec![]),
            ..Default::default()
        };
        let result = h.service.update(created.app.id, None, update).await;
        assert!(matches!(
            result,
            Err(DeploymentError::Validation(ValidationError::ReservedServiceName(_)))
        ));
        let row = h.repository.find_by_id(created.app.id, None).await.unwrap().unwrap();
        assert_eq!(row.services[0].name, "web");
    }

    #[tokio::test]
    async fn test_build_failure_aborts_and_keeps_row() {
        let h = harness();
        h.runtime.fail_on("build");
        let mut events = h.event_bus.subscribe();

        let result = h.service.create(demo_draft(), UserId(1)).await;

        assert!(matches!(result, Err(DeploymentError::Runtime(RuntimeError::Build { .. }))));
        assert!(h.journal.position("runtime.up demo-7").is_none());
        assert!(h.monitoring.targets().is_empty());
        assert!(h.repository.find_by_id(AppId(7), None).await.unwrap().is_some());

        let failed = events.drain().into_iter().any(|event| {
            matches!(
                event,
                DomainEvent::Deployment(DeploymentEvent::PhaseChanged {
                    to: DeploymentPhase::Failed,
                    ..
                })
            )
        });
        assert!(failed);
    }

    #[tokio::test]
    async fn test_scale_reports_every_service_at_count() {
        let h = harness();
        let mut draft = demo_draft();
        draft.services.push(ServiceDefinition::new("worker", "busybox"));
        h.service.create(draft, UserId(1)).await.unwrap();

        h.service.scale(AppId(7), Some(UserId(1)), 3).await.unwrap();

        let containers = h.runtime.list("demo-7-").await.unwrap();
        for service in ["web", "worker"] {
            let prefix = format!("demo-7-{}-", service);
            assert_eq!(containers.iter().filter(|c| c.name.starts_with(&prefix)).count(), 3);
        }
        // The row keeps its declared scale
        let row = h.repository.find_by_id(AppId(7), None).await.unwrap().unwrap();
        assert_eq!(row.scale.current, 1);
    }

    #[tokio::test]
    async fn test_scale_outside_bounds_is_rejected() {
        let h = harness();
        h.service.create(demo_draft(), UserId(1)).await.unwrap();
        h.journal.clear();

        let result = h.service.scale(AppId(7), None, 4).await;

        assert!(matches!(
            result,
            Err(DeploymentError::Validation(ValidationError::ScaleOutOfRange { requested: 4, .. }))
        ));
        assert!(h.journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_delete_tears_down_before_removing_row() {
        let h = harness();
        h.service.create(demo_draft(), UserId(1)).await.unwrap();

        h.service.delete(AppId(7), Some(UserId(1))).await.unwrap();

        let down = h.journal.position("runtime.down demo-7").unwrap();
        let unregister = h.journal.position("monitoring.unregister demo-7").unwrap();
        assert!(down < unregister);
        assert!(!h.runtime.is_running("demo-7"));
        assert!(h.monitoring.targets().is_empty());
        assert!(h.repository.find_by_id(AppId(7), None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_teardown_keeps_row() {
        let h = harness();
        h.service.create(demo_draft(), UserId(1)).await.unwrap();
        h.runtime.fail_on("down");

        let result = h.service.delete(AppId(7), None).await;

        assert!(matches!(result, Err(DeploymentError::Runtime(RuntimeError::Unavailable(_)))));
        assert!(h.repository.find_by_id(AppId(7), None).await.unwrap().is_some());
        assert!(h.monitoring.targets().contains_key("demo-7"));
    }

    #[tokio::test]
    async fn test_ownership_scoping() {
        let h = harness();
        h.service.create(demo_draft(), UserId(1)).await.unwrap();

        let result = h.service.stop(AppId(7), Some(UserId(2))).await;
        assert!(matches!(result, Err(DeploymentError::NotFound(AppId(7)))));
        assert!(h.runtime.is_running("demo-7"));

        h.service.stop(AppId(7), None).await.unwrap();
        assert!(!h.runtime.is_running("demo-7"));
    }

    #[tokio::test]
    async fn test_copy_and_update_touch_only_the_store() {
        let h = harness();
        h.service.create(demo_draft(), UserId(1)).await.unwrap();
        h.journal.clear();

        let copy = h.service.copy(AppId(7), Some(UserId(1)), UserId(2)).await.unwrap();
        assert_eq!(copy.name, "demo-copy");
        assert_eq!(copy.user_id, UserId(2));
        assert_eq!(copy.id, AppId(8));
        // web.demo-7.localhost belongs to the source deployment
        assert!(copy.hosts.is_empty());

        let updated = h
            .service
            .update(
                copy.id,
                Some(UserId(2)),
                AppUpdate {
                    max_scale: Some(5),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.scale.max, 5);
        assert!(h.journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_stop_then_start_cycle() {
        let h = harness();
        h.service.create(demo_draft(), UserId(1)).await.unwrap();

        h.service.stop(AppId(7), None).await.unwrap();
        let stopped = h.service.get_app_with_runtime(AppId(7), None).await.unwrap();
        assert_eq!(stopped.route.status, RouteStatus::Stopped);

        h.service.start(AppId(7), None).await.unwrap();
        let running = h.service.get_app_with_runtime(AppId(7), None).await.unwrap();
        assert_eq!(running.route.status, RouteStatus::Running);
    }

    #[tokio::test]
    async fn test_refresh_registers_running_apps_and_reloads_once() {
        let h = harness();
        h.service.create(demo_draft(), UserId(1)).await.unwrap();
        h.service.create(demo_draft(), UserId(2)).await.unwrap();
        h.service.stop(AppId(8), None).await.unwrap();
        let reloads_before = h.monitoring.reload_count();

        let registered = h.service.refresh_scrape_targets().await.unwrap();

        assert_eq!(registered, 1);
        assert_eq!(h.monitoring.reload_count(), reloads_before + 1);
        let listed = h.service.list_apps_with_runtime(None, 0, 10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].route.status, RouteStatus::Stopped);
    }

    #[tokio::test]
    async fn test_missing_app_is_not_found() {
        let h = harness();
        assert!(matches!(
            h.service.logs(AppId(99), None).await,
            Err(DeploymentError::NotFound(AppId(99)))
        ));
    }
}
