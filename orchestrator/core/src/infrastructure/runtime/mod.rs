// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Runtime Infrastructure Module
//!
//! Concrete implementations of the `DeploymentRuntime` trait.

pub mod compose;

pub use compose::{connect_docker, DockerComposeRuntime};

use crate::domain::runtime::{DeploymentRuntime, RuntimeError};
use std::path::PathBuf;
use std::sync::Arc;

/// Runtime backend configuration
#[derive(Debug, Clone)]
pub enum RuntimeBackend {
    /// Local Docker engine plus the compose CLI
    DockerCompose {
        socket_path: Option<String>,
        compose_dir: PathBuf,
        compose_binary: String,
    },

    /// In-process fake for tests and dry runs
    Mock,
}

/// Factory function to create a deployment runtime from configuration
pub fn create_deployment_runtime(backend: RuntimeBackend) -> Result<Arc<dyn DeploymentRuntime>, RuntimeError> {
    match backend {
        RuntimeBackend::DockerCompose {
            socket_path,
            compose_dir,
            compose_binary,
        } => Ok(Arc::new(DockerComposeRuntime::connect(
            socket_path,
            compose_dir,
            compose_binary,
        )?)),
        RuntimeBackend::Mock => Ok(Arc::new(mock::MockDeploymentRuntime::new())),
    }
}

// Re-export the fakes for testing
pub use mock::{CallJournal, MockDeploymentRuntime};

mod mock {
    use super::*;
    use crate::domain::app::PublishedPort;
    use crate::domain::compose::ComposeDescriptor;
    use crate::domain::runtime::{ContainerUsage, RuntimeContainer};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, BTreeSet};

    /// Ordered record of side effects, shared between fakes so tests can
    /// assert cross-component ordering.
    #[derive(Clone, Default)]
    pub struct CallJournal {
        entries: Arc<Mutex<Vec<String>>>,
    }

    impl CallJournal {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn record(&self, entry: impl Into<String>) {
            self.entries.lock().push(entry.into());
        }

        pub fn entries(&self) -> Vec<String> {
            self.entries.lock().clone()
        }

        /// Position of the first entry equal to `entry`.
        pub fn position(&self, entry: &str) -> Option<usize> {
            self.entries.lock().iter().position(|e| e == entry)
        }

        pub fn clear(&self) {
            self.entries.lock().clear();
        }
    }

    #[derive(Debug, Clone)]
    struct FakeDeployment {
        network: String,
        services: Vec<String>,
        proxy: Option<String>,
        replicas: BTreeMap<String, u32>,
        running: bool,
    }

    #[derive(Default)]
    struct FakeEngine {
        deployments: BTreeMap<String, FakeDeployment>,
        failing: BTreeSet<String>,
        hide_proxy: bool,
    }

    /// Emulates compose naming (`{project}-{service}-{n}`) for every
    /// replica of a running deployment.
    #[derive(Clone, Default)]
    pub struct MockDeploymentRuntime {
        engine: Arc<Mutex<FakeEngine>>,
        journal: CallJournal,
    }

    impl MockDeploymentRuntime {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_journal(journal: CallJournal) -> Self {
            Self {
                engine: Arc::default(),
                journal,
            }
        }

        pub fn journal(&self) -> CallJournal {
            self.journal.clone()
        }

        /// Make every subsequent call of `operation` fail.
        pub fn fail_on(&self, operation: &str) {
            self.engine.lock().failing.insert(operation.to_string());
        }

        pub fn recover(&self, operation: &str) {
            self.engine.lock().failing.remove(operation);
        }

        /// Keep proxy containers out of listings, as if the proxy crashed.
        pub fn hide_proxy(&self, hide: bool) {
            self.engine.lock().hide_proxy = hide;
        }

        pub fn is_running(&self, project: &str) -> bool {
            self.engine
                .lock()
                .deployments
                .get(project)
                .is_some_and(|d| d.running)
        }

        fn enter(&self, operation: &str, project: &str) -> Result<(), RuntimeError> {
            self.journal.record(format!("runtime.{} {}", operation, project));
            if self.engine.lock().failing.contains(operation) {
                return Err(match operation {
                    "build" => RuntimeError::Build {
                        deployment: project.to_string(),
                        message: "injected build failure".to_string(),
                    },
                    _ => RuntimeError::Unavailable(format!("injected {} failure", operation)),
                });
            }
            Ok(())
        }
    }

    fn fake_address(project: &str, index: usize) -> String {
        let seed = project.bytes().fold(0u32, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u32));
        format!("172.{}.{}.{}", 18 + seed % 8, (seed / 8) % 250, 2 + index % 250)
    }

    #[async_trait]
    impl DeploymentRuntime for MockDeploymentRuntime {
        async fn build(&self, descriptor: &ComposeDescriptor) -> Result<(), RuntimeError> {
            self.enter("build", &descriptor.project)
        }

        async fn up(
            &self,
            descriptor: &ComposeDescriptor,
            _detach: bool,
            scales: Option<&BTreeMap<String, u32>>,
        ) -> Result<(), RuntimeError> {
            self.enter("up", &descriptor.project)?;
            let mut engine = self.engine.lock();
            let deployment = engine
                .deployments
                .entry(descriptor.project.clone())
                .or_insert_with(|| FakeDeployment {
                    network: descriptor.network.clone(),
                    services: Vec::new(),
                    proxy: None,
                    replicas: BTreeMap::new(),
                    running: false,
                });

            deployment.services = descriptor.service_names().map(str::to_string).collect();
            deployment.proxy = descriptor.proxy.as_ref().map(|p| p.name.clone());
            for block in &descriptor.services {
                let replicas = scales
                    .and_then(|s| s.get(&block.name).copied())
                    .unwrap_or(block.replicas);
                deployment.replicas.insert(block.name.clone(), replicas);
            }
            deployment.running = true;
            Ok(())
        }

        async fn stop(&self, descriptor: &ComposeDescriptor) -> Result<(), RuntimeError> {
            self.enter("stop", &descriptor.project)?;
            if let Some(deployment) = self.engine.lock().deployments.get_mut(&descriptor.project) {
                deployment.running = false;
            }
            Ok(())
        }

        async fn restart(&self, descriptor: &ComposeDescriptor) -> Result<(), RuntimeError> {
            self.enter("restart", &descriptor.project)?;
            if let Some(deployment) = self.engine.lock().deployments.get_mut(&descriptor.project) {
                deployment.running = true;
            }
            Ok(())
        }

        async fn down(&self, descriptor: &ComposeDescriptor) -> Result<(), RuntimeError> {
            self.enter("down", &descriptor.project)?;
            self.engine.lock().deployments.remove(&descriptor.project);
            Ok(())
        }

        async fn logs(&self, descriptor: &ComposeDescriptor) -> Result<String, RuntimeError> {
            self.enter("logs", &descriptor.project)?;
            let containers = self.list(&format!("{}-", descriptor.project)).await?;
            Ok(containers
                .iter()
                .map(|c| format!("{} | started\n", c.name))
                .collect())
        }

        async fn stats(&self, deployment: &str) -> Result<Vec<ContainerUsage>, RuntimeError> {
            self.enter("stats", deployment)?;
            let containers = self.list(&format!("{}-", deployment)).await?;
            Ok(containers
                .into_iter()
                .map(|c| ContainerUsage {
                    container_name: c.name,
                    cpu_percent: 0.5,
                    memory_usage_bytes: 64 * 1024 * 1024,
                    memory_limit_bytes: 512 * 1024 * 1024,
                    memory_percent: 12.5,
                })
                .collect())
        }

        async fn list(&self, prefix: &str) -> Result<Vec<RuntimeContainer>, RuntimeError> {
            if self.engine.lock().failing.contains("list") {
                return Err(RuntimeError::Unavailable("injected list failure".to_string()));
            }
            let engine = self.engine.lock();
            let mut containers = Vec::new();
            for (project, deployment) in engine.deployments.iter().filter(|(_, d)| d.running) {
                for service in &deployment.services {
                    let replicas = deployment.replicas.get(service).copied().unwrap_or(0);
                    for n in 1..=replicas {
                        let name = format!("{}-{}-{}", project, service, n);
                        containers.push(RuntimeContainer {
                            id: format!("id-{}", name),
                            name,
                            state: "running".to_string(),
                            networks: BTreeMap::new(),
                            ports: Vec::new(),
                        });
                    }
                }
                if let Some(proxy) = deployment.proxy.as_ref().filter(|_| !engine.hide_proxy) {
                    let name = format!("{}-{}-1", project, proxy);
                    containers.push(RuntimeContainer {
                        id: format!("id-{}", name),
                        name,
                        state: "running".to_string(),
                        networks: BTreeMap::from([(deployment.network.clone(), fake_address(project, 0))]),
                        ports: vec![PublishedPort {
                            private_port: 80,
                            public_port: Some(32768),
                            protocol: "tcp".to_string(),
                        }],
                    });
                }
            }
            containers.retain(|c| c.name.starts_with(prefix));
            containers.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(containers)
        }

        async fn cleanup(&self, deployment: &str) -> Result<(), RuntimeError> {
            self.enter("cleanup", deployment)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::app::{App, AppDraft, AppId, ScaleBounds, ServiceDefinition, UserId};
    use crate::domain::compose::{build_descriptor, ComposeSettings, ProxySettings};

    fn descriptor(id: i64) -> crate::domain::compose::ComposeDescriptor {
        let app = App::from_draft(
            AppId(id),
            UserId(1),
            AppDraft {
                name: "demo".to_string(),
                services: vec![ServiceDefinition::new("web", "x")],
                hosts: vec![],
                scale: ScaleBounds::new(1, 1, 3).unwrap(),
                force_stop: false,
            },
        );
        let settings = ComposeSettings {
            network: "crane".to_string(),
            proxy: Some(ProxySettings::default()),
        };
        build_descriptor(&app, &settings).unwrap()
    }

    #[tokio::test]
    async fn test_mock_runtime_prefix_does_not_leak_between_ids() {
        let runtime = create_deployment_runtime(RuntimeBackend::Mock).unwrap();
        runtime.up(&descriptor(7), true, None).await.unwrap();
        runtime.up(&descriptor(71), true, None).await.unwrap();

        let names: Vec<String> = runtime.list("demo-7-").await.unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["demo-7-traefik-1".to_string(), "demo-7-web-1".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_runtime_scale_and_journal() {
        let runtime = MockDeploymentRuntime::new();
        let descriptor = descriptor(7);
        runtime.up(&descriptor, true, Some(&descriptor.uniform_scale(3))).await.unwrap();

        let web = runtime.list("demo-7-web-").await.unwrap();
        assert_eq!(web.len(), 3);

        runtime.fail_on("stop");
        assert!(matches!(runtime.stop(&descriptor).await, Err(RuntimeError::Unavailable(_))));
        assert!(runtime.is_running("demo-7"));
        assert_eq!(
            runtime.journal().entries(),
            vec!["runtime.up demo-7".to_string(), "runtime.stop demo-7".to_string()]
        );
    }
}
