// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Prometheus Scrape Registrar
//!
//! One Prometheus `file_sd` file per deployment, `{scrape_dir}/{deployment}.yml`,
//! pointing at the deployment's reverse-proxy metrics entrypoint. Files are
//! written through a temporary sibling and renamed so the collector never
//! reads a partial target list.
//!
//! `reload()` restarts every container of the monitoring compose project.

use crate::domain::monitoring::{MonitoringError, MonitoringRegistrar};
use async_trait::async_trait;
use bollard::container::{ListContainersOptions, RestartContainerOptions};
use bollard::Docker;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSdGroup {
    pub targets: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

pub struct PrometheusScrapeRegistrar {
    scrape_dir: PathBuf,
    metrics_port: u16,
    compose_project: String,
    docker: Option<Docker>,
}

impl PrometheusScrapeRegistrar {
    /// `docker = None` disables `reload()`, for hosts where the collector
    /// watches the directory itself.
    pub fn new(scrape_dir: PathBuf, metrics_port: u16, compose_project: String, docker: Option<Docker>) -> Self {
        Self {
            scrape_dir,
            metrics_port,
            compose_project,
            docker,
        }
    }

    pub fn target_path(&self, deployment: &str) -> PathBuf {
        self.scrape_dir.join(format!("{}.yml", deployment))
    }

    fn io_error(deployment: &str, err: impl std::fmt::Display) -> MonitoringError {
        MonitoringError::Io {
            deployment: deployment.to_string(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl MonitoringRegistrar for PrometheusScrapeRegistrar {
    async fn register_scrape_target(&self, deployment: &str, address: &str) -> Result<(), MonitoringError> {
        let groups = vec![FileSdGroup {
            targets: vec![format!("{}:{}", address, self.metrics_port)],
            labels: BTreeMap::from([("app".to_string(), deployment.to_string())]),
        }];
        let yaml = serde_yaml::to_string(&groups).map_err(|e| Self::io_error(deployment, e))?;

        tokio::fs::create_dir_all(&self.scrape_dir)
            .await
            .map_err(|e| Self::io_error(deployment, e))?;
        let path = self.target_path(deployment);
        let staging = self.scrape_dir.join(format!(".{}.yml.tmp", deployment));
        tokio::fs::write(&staging, yaml)
            .await
            .map_err(|e| Self::io_error(deployment, e))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| Self::io_error(deployment, e))?;

        info!(deployment, address, path = %path.display(), "Registered scrape target");
        Ok(())
    }

    async fn unregister_scrape_target(&self, deployment: &str) -> Result<(), MonitoringError> {
        let path = self.target_path(deployment);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(deployment, "Removed scrape target");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(deployment, "No scrape target to remove");
                Ok(())
            }
            Err(e) => Err(Self::io_error(deployment, e)),
        }
    }

    async fn reload(&self) -> Result<(), MonitoringError> {
        let Some(docker) = &self.docker else {
            debug!("Monitoring reload disabled");
            return Ok(());
        };

        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("com.docker.compose.project={}", self.compose_project)],
        )]);
        let containers = docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| MonitoringError::Unavailable(e.to_string()))?;

        if containers.is_empty() {
            warn!(project = %self.compose_project, "No monitoring containers found to reload");
            return Ok(());
        }

        for container in containers {
            let Some(id) = container.id else { continue };
            docker
                .restart_container(&id, Some(RestartContainerOptions { t: 10 }))
                .await
                .map_err(|e| MonitoringError::Unavailable(format!("restart {}: {}", id, e)))?;
        }
        info!(project = %self.compose_project, "Reloaded monitoring stack");
        Ok(())
    }
}

// Re-export MockMonitoringRegistrar for testing
pub use mock::MockMonitoringRegistrar;

mod mock {
    use super::*;
    use crate::infrastructure::runtime::CallJournal;
    use parking_lot::Mutex;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    pub struct MockMonitoringRegistrar {
        targets: Arc<Mutex<BTreeMap<String, String>>>,
        reloads: Arc<Mutex<usize>>,
        failing: Arc<Mutex<BTreeSet<String>>>,
        journal: CallJournal,
    }

    impl MockMonitoringRegistrar {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_journal(journal: CallJournal) -> Self {
            Self {
                journal,
                ..Self::default()
            }
        }

        pub fn targets(&self) -> BTreeMap<String, String> {
            self.targets.lock().clone()
        }

        pub fn reload_count(&self) -> usize {
            *self.reloads.lock()
        }

        pub fn fail_on(&self, operation: &str) {
            self.failing.lock().insert(operation.to_string());
        }

        fn enter(&self, entry: String, operation: &str) -> Result<(), MonitoringError> {
            self.journal.record(entry);
            if self.failing.lock().contains(operation) {
                return Err(MonitoringError::Unavailable(format!("injected {} failure", operation)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl MonitoringRegistrar for MockMonitoringRegistrar {
        async fn register_scrape_target(&self, deployment: &str, address: &str) -> Result<(), MonitoringError> {
            self.enter(format!("monitoring.register {}", deployment), "register")?;
            self.targets.lock().insert(deployment.to_string(), address.to_string());
            Ok(())
        }

        async fn unregister_scrape_target(&self, deployment: &str) -> Result<(), MonitoringError> {
            self.enter(format!("monitoring.unregister {}", deployment), "unregister")?;
            self.targets.lock().remove(deployment);
            Ok(())
        }

        async fn reload(&self) -> Result<(), MonitoringError> {
            self.enter("monitoring.reload".to_string(), "reload")?;
            *self.reloads.lock() += 1;
            Ok(())
        }
    }
}
