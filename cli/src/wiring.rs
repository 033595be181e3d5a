// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Service wiring
//!
//! Builds the core services from a validated `CraneConfigManifest`: Docker
//! and the compose CLI for the runtime, `file_sd` targets for monitoring,
//! PostgreSQL (or in-memory) repositories and the OPA client.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crane_core::{
    application::{
        deployment::StandardDeploymentService,
        policy_sync::PolicySynthesizer,
        repository_factory::{create_repositories, Repositories},
    },
    domain::{crane_config::CraneConfigManifest, repository::StorageBackend},
    infrastructure::{
        event_bus::EventBus,
        monitoring::PrometheusScrapeRegistrar,
        opa::OpaPolicyClient,
        rule_file::RuleSetFileWriter,
        runtime::DockerComposeRuntime,
    },
};

pub struct Services {
    config: CraneConfigManifest,
    repositories: Repositories,
    event_bus: Arc<EventBus>,
}

impl Services {
    pub async fn new(config: CraneConfigManifest) -> Result<Self> {
        config.validate().context("Configuration validation failed")?;

        let backend = config.storage_backend();
        if matches!(backend, StorageBackend::InMemory) {
            warn!("No database configured; using in-memory repositories (state is lost on exit)");
        }
        let repositories = create_repositories(&backend).await?;

        Ok(Self {
            config,
            repositories,
            event_bus: Arc::new(EventBus::with_default_capacity()),
        })
    }

    pub async fn deployment_service(&self) -> Result<StandardDeploymentService> {
        let runtime_config = &self.config.spec.runtime;
        let runtime = DockerComposeRuntime::connect(
            runtime_config.docker_socket_path.clone(),
            runtime_config.compose_dir.clone(),
            runtime_config.compose_binary.clone(),
        )
        .context("Failed to initialize Docker runtime")?;
        runtime.healthcheck().await.context("Docker health check failed")?;
        info!("Docker runtime ready");

        let monitoring_config = &self.config.spec.monitoring;
        let reload_client = monitoring_config.enabled.then(|| runtime.docker().clone());
        let monitoring = PrometheusScrapeRegistrar::new(
            monitoring_config.scrape_dir.clone(),
            self.config.spec.routing.proxy.metrics_port,
            monitoring_config.compose_project.clone(),
            reload_client,
        );

        Ok(StandardDeploymentService::new(
            self.repositories.apps.clone(),
            Arc::new(runtime),
            Arc::new(monitoring),
            self.event_bus.clone(),
            self.config.compose_settings(),
        ))
    }

    pub fn policy_synthesizer(&self) -> Result<PolicySynthesizer> {
        let policy = &self.config.spec.policy;
        let output_dir = policy
            .output_dir
            .clone()
            .context("spec.policy.output_dir is required")?;
        let client = OpaPolicyClient::new(
            policy.opa_url.clone(),
            Duration::from_secs(policy.request_timeout_secs),
        )
        .context("Failed to create OPA client")?;

        Ok(PolicySynthesizer::new(
            self.repositories.rbac.clone(),
            RuleSetFileWriter::new(output_dir),
            Arc::new(client),
            policy.policy_name.clone(),
            self.event_bus.clone(),
        ))
    }

    pub fn config(&self) -> &CraneConfigManifest {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_policy_synthesizer_requires_output_dir() {
        let mut config = CraneConfigManifest::default();
        config.spec.policy.output_dir = Some("/tmp/crane-policies".into());
        let services = Services::new(config).await.unwrap();
        assert_eq!(services.policy_synthesizer().unwrap().policy_name(), "rbac");

        let result = Services::new(CraneConfigManifest::default()).await;
        assert!(result.is_err());
    }
}
