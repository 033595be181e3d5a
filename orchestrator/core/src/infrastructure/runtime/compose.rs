// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Docker Compose Runtime
//!
//! `DeploymentRuntime` over a local Docker engine.
//!
//! `build`, `up`, `stop` and `down` run the compose CLI against
//! `{compose_dir}/{project}/docker-compose.yml`, rewritten from the descriptor
//! on every call. `restart` and `logs` address the running project by name
//! only and leave no descriptor behind. Discovery and resource snapshots go
//! through the Engine API via `bollard`.

use crate::domain::app::PublishedPort;
use crate::domain::compose::ComposeDescriptor;
use crate::domain::runtime::{ContainerUsage, DeploymentRuntime, RuntimeContainer, RuntimeError};
use async_trait::async_trait;
use bollard::container::{ListContainersOptions, StatsOptions};
use bollard::models::ContainerSummary;
use bollard::Docker;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const DESCRIPTOR_FILE: &str = "docker-compose.yml";
const COMMAND_TIMEOUT: Duration = Duration::from_secs(900);

pub struct DockerComposeRuntime {
    docker: Docker,
    socket_path: Option<String>,
    compose_dir: PathBuf,
    compose_binary: String,
}

/// Connect to the Docker daemon (custom socket or auto-detect).
pub fn connect_docker(socket_path: Option<&str>) -> Result<Docker, RuntimeError> {
    match socket_path {
        Some(path) => Docker::connect_with_unix(path, 120, bollard::API_DEFAULT_VERSION).map_err(|e| {
            RuntimeError::Unavailable(format!(
                "Failed to connect to Docker at {}: {}\n\n\
                 Ensure Docker is running and the socket path is correct.",
                path, e
            ))
        }),
        None => Docker::connect_with_local_defaults().map_err(|e| {
            RuntimeError::Unavailable(format!(
                "Failed to connect to Docker: {}\n\n\
                 Common causes:\n\
                 - Docker daemon not running (check: docker ps)\n\
                 - Permission denied accessing Docker socket\n\
                 - Current user not in 'docker' group",
                e
            ))
        }),
    }
}

impl DockerComposeRuntime {
    pub fn connect(
        socket_path: Option<String>,
        compose_dir: PathBuf,
        compose_binary: String,
    ) -> Result<Self, RuntimeError> {
        let docker = connect_docker(socket_path.as_deref())?;
        Ok(Self {
            docker,
            socket_path,
            compose_dir,
            compose_binary,
        })
    }

    /// Engine handle, shared with the monitoring registrar.
    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    /// Verify Docker daemon is accessible
    pub async fn healthcheck(&self) -> Result<(), RuntimeError> {
        self.docker.ping().await.map_err(|e| {
            RuntimeError::Unavailable(format!(
                "Cannot connect to Docker daemon: {}\n\n\
                 Ensure Docker is running. Verify with: docker ps",
                e
            ))
        })?;
        Ok(())
    }

    fn descriptor_path(&self, project: &str) -> PathBuf {
        self.compose_dir.join(project).join(DESCRIPTOR_FILE)
    }

    async fn write_descriptor(&self, descriptor: &ComposeDescriptor) -> Result<PathBuf, RuntimeError> {
        let to_error = |message: String| RuntimeError::Descriptor {
            deployment: descriptor.project.clone(),
            message,
        };
        let yaml = descriptor.to_compose_yaml().map_err(|e| to_error(e.to_string()))?;
        let path = self.descriptor_path(&descriptor.project);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| to_error(format!("{}: {}", parent.display(), e)))?;
        }
        tokio::fs::write(&path, yaml)
            .await
            .map_err(|e| to_error(format!("{}: {}", path.display(), e)))?;
        Ok(path)
    }

    /// Write the descriptor, then run `{binary} compose -p {project} -f {file} {args}`.
    async fn compose(&self, descriptor: &ComposeDescriptor, args: &[String]) -> Result<String, RuntimeError> {
        let file = self.write_descriptor(descriptor).await?;
        self.run_compose(&descriptor.project, Some(&file), args).await
    }

    /// Run `{binary} compose -p {project} {args}` against the containers compose
    /// already labelled with the project. Nothing is written to `compose_dir`.
    async fn compose_project(&self, project: &str, args: &[String]) -> Result<String, RuntimeError> {
        self.run_compose(project, None, args).await
    }

    async fn run_compose(&self, project: &str, file: Option<&Path>, args: &[String]) -> Result<String, RuntimeError> {
        let subcommand = args.first().cloned().unwrap_or_default();

        let mut cmd = tokio::process::Command::new(&self.compose_binary);
        cmd.arg("compose").arg("-p").arg(project);
        if let Some(file) = file {
            cmd.arg("-f").arg(file);
        }
        cmd.args(args).kill_on_drop(true);
        if let Some(socket) = &self.socket_path {
            cmd.env("DOCKER_HOST", format!("unix://{}", socket));
        }

        debug!(deployment = %project, ?args, "Running compose command");
        let output = match tokio::time::timeout(COMMAND_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(RuntimeError::Unavailable(format!(
                    "Failed to launch '{} compose': {}",
                    self.compose_binary, e
                )))
            }
            Err(_) => {
                return Err(RuntimeError::Unavailable(format!(
                    "'compose {}' for {} timed out after {}s",
                    subcommand,
                    project,
                    COMMAND_TIMEOUT.as_secs()
                )))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if output.status.success() {
            return Ok(stdout);
        }

        if is_daemon_unreachable(&stderr) {
            return Err(RuntimeError::Unavailable(stderr.trim().to_string()));
        }
        if subcommand == "build" {
            return Err(RuntimeError::Build {
                deployment: project.to_string(),
                message: stderr.trim().to_string(),
            });
        }
        Err(RuntimeError::CommandFailed {
            deployment: project.to_string(),
            command: subcommand,
            status: output.status.code(),
            stderr: stderr.trim().to_string(),
        })
    }

    async fn list_summaries(&self, filters: HashMap<String, Vec<String>>, all: bool) -> Result<Vec<ContainerSummary>, RuntimeError> {
        let options = ListContainersOptions {
            all,
            filters,
            ..Default::default()
        };
        self.docker
            .list_containers(Some(options))
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("Failed to list containers: {}", e)))
    }
}

fn is_daemon_unreachable(stderr: &str) -> bool {
    stderr.contains("Cannot connect to the Docker daemon") || stderr.contains("permission denied while trying to connect")
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Translate an Engine API summary; containers without a name are skipped.
pub(crate) fn container_from_summary(summary: ContainerSummary) -> Option<RuntimeContainer> {
    let name = summary
        .names
        .as_ref()
        .and_then(|names| names.first())
        .map(|n| n.trim_start_matches('/').to_string())?;

    let networks = summary
        .network_settings
        .and_then(|settings| settings.networks)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(network, endpoint)| {
            endpoint
                .ip_address
                .filter(|ip| !ip.is_empty())
                .map(|ip| (network, ip))
        })
        .collect::<BTreeMap<_, _>>();

    let mut ports: Vec<PublishedPort> = Vec::new();
    for port in summary.ports.unwrap_or_default() {
        let published = PublishedPort {
            private_port: port.private_port,
            public_port: port.public_port,
            protocol: port
                .typ
                .map(|t| t.to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "tcp".to_string()),
        };
        // IPv4 and IPv6 bindings of the same port are reported twice
        if !ports.contains(&published) {
            ports.push(published);
        }
    }
    ports.sort_by_key(|p| (p.private_port, p.public_port));

    Some(RuntimeContainer {
        id: summary.id.unwrap_or_default(),
        name,
        state: summary.state.unwrap_or_default(),
        networks,
        ports,
    })
}

pub(crate) fn cpu_percent(total: u64, pre_total: u64, system: u64, pre_system: u64, online_cpus: u64) -> f64 {
    let cpu_delta = total.saturating_sub(pre_total) as f64;
    let system_delta = system.saturating_sub(pre_system) as f64;
    if cpu_delta <= 0.0 || system_delta <= 0.0 {
        return 0.0;
    }
    cpu_delta / system_delta * online_cpus.max(1) as f64 * 100.0
}

pub(crate) fn memory_percent(usage: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    usage as f64 / limit as f64 * 100.0
}

#[async_trait]
impl DeploymentRuntime for DockerComposeRuntime {
    async fn build(&self, descriptor: &ComposeDescriptor) -> Result<(), RuntimeError> {
        info!(deployment = %descriptor.project, "Building deployment");
        self.compose(descriptor, &args(&["build"])).await?;
        Ok(())
    }

    async fn up(
        &self,
        descriptor: &ComposeDescriptor,
        detach: bool,
        scales: Option<&BTreeMap<String, u32>>,
    ) -> Result<(), RuntimeError> {
        let mut command = args(&["up"]);
        if detach {
            command.push("-d".to_string());
        }
        for (service, replicas) in scales.into_iter().flatten() {
            command.push("--scale".to_string());
            command.push(format!("{}={}", service, replicas));
        }
        info!(deployment = %descriptor.project, ?scales, "Starting deployment");
        self.compose(descriptor, &command).await?;
        Ok(())
    }

    async fn stop(&self, descriptor: &ComposeDescriptor) -> Result<(), RuntimeError> {
        info!(deployment = %descriptor.project, "Stopping deployment");
        self.compose(descriptor, &args(&["stop"])).await?;
        Ok(())
    }

    async fn restart(&self, descriptor: &ComposeDescriptor) -> Result<(), RuntimeError> {
        info!(deployment = %descriptor.project, "Restarting deployment");
        self.compose_project(&descriptor.project, &args(&["restart"])).await?;
        Ok(())
    }

    async fn down(&self, descriptor: &ComposeDescriptor) -> Result<(), RuntimeError> {
        info!(deployment = %descriptor.project, "Tearing down deployment");
        self.compose(descriptor, &args(&["down", "--volumes", "--remove-orphans"]))
            .await?;
        Ok(())
    }

    async fn logs(&self, descriptor: &ComposeDescriptor) -> Result<String, RuntimeError> {
        self.compose_project(&descriptor.project, &args(&["logs", "--no-color", "--timestamps"]))
            .await
    }

    async fn stats(&self, deployment: &str) -> Result<Vec<ContainerUsage>, RuntimeError> {
        let containers = self.list(&format!("{}-", deployment)).await?;
        let mut usages = Vec::with_capacity(containers.len());

        for container in containers {
            // stream=false without one_shot waits for a second sample, so precpu_stats is populated
            let options = StatsOptions {
                stream: false,
                one_shot: false,
            };
            let mut stream = self.docker.stats(&container.name, Some(options));
            let stats = match stream.next().await {
                Some(Ok(stats)) => stats,
                Some(Err(e)) => {
                    return Err(RuntimeError::Unavailable(format!(
                        "Failed to read stats for {}: {}",
                        container.name, e
                    )))
                }
                None => {
                    warn!(container = %container.name, "Container exited before stats were sampled");
                    continue;
                }
            };

            let cpu = &stats.cpu_stats;
            let pre = &stats.precpu_stats;
            let online_cpus = cpu
                .online_cpus
                .or_else(|| cpu.cpu_usage.percpu_usage.as_ref().map(|v| v.len() as u64))
                .unwrap_or(1);
            let memory_usage = stats.memory_stats.usage.unwrap_or(0);
            let memory_limit = stats.memory_stats.limit.unwrap_or(0);

            usages.push(ContainerUsage {
                container_name: container.name,
                cpu_percent: cpu_percent(
                    cpu.cpu_usage.total_usage,
                    pre.cpu_usage.total_usage,
                    cpu.system_cpu_usage.unwrap_or(0),
                    pre.system_cpu_usage.unwrap_or(0),
                    online_cpus,
                ),
                memory_usage_bytes: memory_usage,
                memory_limit_bytes: memory_limit,
                memory_percent: memory_percent(memory_usage, memory_limit),
            });
        }
        Ok(usages)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<RuntimeContainer>, RuntimeError> {
        // The engine's name filter is a substring match; the prefix check below is authoritative
        let filters = HashMap::from([("name".to_string(), vec![prefix.to_string()])]);
        let summaries = self.list_summaries(filters, false).await?;

        let mut containers: Vec<RuntimeContainer> = summaries
            .into_iter()
            .filter_map(container_from_summary)
            .filter(|c| c.name.starts_with(prefix))
            .collect();
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(prefix, count = containers.len(), "Listed containers");
        Ok(containers)
    }

    async fn cleanup(&self, deployment: &str) -> Result<(), RuntimeError> {
        let dir = self.compose_dir.join(deployment);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RuntimeError::Descriptor {
                deployment: deployment.to_string(),
                message: format!("{}: {}", dir.display(), e),
            }),
        }
    }
}
