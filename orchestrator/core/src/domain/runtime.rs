// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::app::PublishedPort;
use crate::domain::compose::ComposeDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The container runtime could not be reached (daemon down, socket missing, timeout)
    #[error("Container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to build deployment {deployment}: {message}")]
    Build { deployment: String, message: String },

    #[error("Runtime command '{command}' failed for {deployment} (exit {status:?}): {stderr}")]
    CommandFailed {
        deployment: String,
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Failed to materialize descriptor for {deployment}: {message}")]
    Descriptor { deployment: String, message: String },
}

/// A live container as reported by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeContainer {
    pub id: String,
    /// Container name without the leading `/`
    pub name: String,
    pub state: String,
    /// Network name to IP address on that network
    pub networks: BTreeMap<String, String>,
    pub ports: Vec<PublishedPort>,
}

/// Point-in-time resource usage of one container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerUsage {
    pub container_name: String,
    pub cpu_percent: f64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub memory_percent: f64,
}

/// Operations against the container runtime, keyed by deployment (compose project) name.
#[async_trait]
pub trait DeploymentRuntime: Send + Sync {
    async fn build(&self, descriptor: &ComposeDescriptor) -> Result<(), RuntimeError>;

    /// Start or converge the deployment; safe on an already running deployment.
    async fn up(
        &self,
        descriptor: &ComposeDescriptor,
        detach: bool,
        scales: Option<&BTreeMap<String, u32>>,
    ) -> Result<(), RuntimeError>;

    async fn stop(&self, descriptor: &ComposeDescriptor) -> Result<(), RuntimeError>;

    async fn restart(&self, descriptor: &ComposeDescriptor) -> Result<(), RuntimeError>;

    /// Tear down containers plus the networks and volumes scoped to the deployment.
    async fn down(&self, descriptor: &ComposeDescriptor) -> Result<(), RuntimeError>;

    async fn logs(&self, descriptor: &ComposeDescriptor) -> Result<String, RuntimeError>;

    async fn stats(&self, deployment: &str) -> Result<Vec<ContainerUsage>, RuntimeError>;

    /// Live containers whose name starts with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<RuntimeContainer>, RuntimeError>;

    /// Remove on-disk descriptor artifacts left by previous calls.
    async fn cleanup(&self, deployment: &str) -> Result<(), RuntimeError>;
}
