// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Route Discovery
//!
//! Locates a deployment's reverse-proxy container (`{deployment}-{proxy}` or
//! compose's `{deployment}-{proxy}-{n}`) and reads its address on the
//! orchestration network plus its published ports.
//!
//! A deployment without a proxy container is reported as `Stopped`; this is
//! never an error. [`RouteDiagnosis`] keeps the internal distinction between
//! a deployment that never started and one whose proxy disappeared.

use crate::domain::app::{ProxyRoute, RouteStatus};
use crate::domain::compose::ComposeSettings;
use crate::domain::runtime::{DeploymentRuntime, RuntimeContainer, RuntimeError};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDiagnosis {
    Running,
    /// No live container carries the deployment prefix
    NeverStarted,
    /// Containers are live but none matches the proxy naming convention
    ProxyMissing,
    /// Routing is disabled in configuration
    ProxyDisabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDiscovery {
    pub route: ProxyRoute,
    pub diagnosis: RouteDiagnosis,
}

impl RouteDiscovery {
    fn stopped(diagnosis: RouteDiagnosis) -> Self {
        Self {
            route: ProxyRoute::stopped(),
            diagnosis,
        }
    }
}

fn is_proxy_container(name: &str, proxy_prefix: &str) -> bool {
    match name.strip_prefix(proxy_prefix) {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix('-')
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit())),
        None => false,
    }
}

pub async fn discover_route(
    deployment: &str,
    runtime: &dyn DeploymentRuntime,
    settings: &ComposeSettings,
) -> Result<RouteDiscovery, RuntimeError> {
    let Some(proxy) = &settings.proxy else {
        return Ok(RouteDiscovery::stopped(RouteDiagnosis::ProxyDisabled));
    };

    let containers = runtime.list(&format!("{}-", deployment)).await?;
    if containers.is_empty() {
        debug!(deployment, "No live containers; route stopped");
        return Ok(RouteDiscovery::stopped(RouteDiagnosis::NeverStarted));
    }

    let proxy_prefix = format!("{}-{}", deployment, proxy.service);
    let mut matches: Vec<&RuntimeContainer> = containers
        .iter()
        .filter(|c| is_proxy_container(&c.name, &proxy_prefix))
        .collect();
    matches.sort_by(|a, b| a.name.cmp(&b.name));

    let Some(selected) = matches.first() else {
        warn!(
            deployment,
            live_containers = containers.len(),
            expected = %proxy_prefix,
            "Deployment has live containers but no proxy container; reporting route as stopped"
        );
        return Ok(RouteDiscovery::stopped(RouteDiagnosis::ProxyMissing));
    };
    if matches.len() > 1 {
        warn!(
            deployment,
            candidates = matches.len(),
            selected = %selected.name,
            "Several proxy containers match; using the first by name"
        );
    }

    let address = selected.networks.get(&settings.network).cloned();
    if address.is_none() {
        warn!(
            deployment,
            container = %selected.name,
            network = %settings.network,
            "Proxy container is not attached to the orchestration network"
        );
    }

    Ok(RouteDiscovery {
        route: ProxyRoute {
            address,
            ports: Some(selected.ports.clone()),
            status: RouteStatus::Running,
        },
        diagnosis: RouteDiagnosis::Running,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::app::{App, AppDraft, AppId, ScaleBounds, ServiceDefinition, UserId};
    use crate::domain::compose::{build_descriptor, ProxySettings};
    use crate::infrastructure::runtime::MockDeploymentRuntime;

    fn settings() -> ComposeSettings {
        ComposeSettings {
            network: "crane".to_string(),
            proxy: Some(ProxySettings::default()),
        }
    }

    fn demo(id: i64) -> App {
        App::from_draft(
            AppId(id),
            UserId(1),
            AppDraft {
                name: "demo".to_string(),
                services: vec![ServiceDefinition::new("web", "x")],
                hosts: vec![],
                scale: ScaleBounds::new(1, 1, 3).unwrap(),
                force_stop: false,
            },
        )
    }

    #[test]
    fn test_proxy_name_matching() {
        assert!(is_proxy_container("demo-7-traefik", "demo-7-traefik"));
        assert!(is_proxy_container("demo-7-traefik-1", "demo-7-traefik"));
        assert!(!is_proxy_container("demo-7-traefik-ui-1", "demo-7-traefik"));
        assert!(!is_proxy_container("demo-7-traefik-", "demo-7-traefik"));
        assert!(!is_proxy_container("demo-71-traefik-1", "demo-7-traefik"));
    }

    #[tokio::test]
    async fn test_no_live_containers_is_stopped_without_error() {
        let runtime = MockDeploymentRuntime::new();
        let discovery = discover_route("demo-7", &runtime, &settings()).await.unwrap();

        assert_eq!(
            discovery.route,
            ProxyRoute {
                address: None,
                ports: None,
                status: RouteStatus::Stopped
            }
        );
        assert_eq!(discovery.diagnosis, RouteDiagnosis::NeverStarted);
    }

    #[tokio::test]
    async fn test_running_proxy_yields_address_and_ports() {
        let runtime = MockDeploymentRuntime::new();
        let descriptor = build_descriptor(&demo(7), &settings()).unwrap();
        runtime.up(&descriptor, true, None).await.unwrap();

        let discovery = discover_route("demo-7", &runtime, &settings()).await.unwrap();
        assert_eq!(discovery.diagnosis, RouteDiagnosis::Running);
        assert_eq!(discovery.route.status, RouteStatus::Running);
        assert!(discovery.route.address.is_some());
        assert_eq!(discovery.route.ports.unwrap()[0].private_port, 80);
    }

    #[tokio::test]
    async fn test_missing_proxy_is_distinguished_from_never_started() {
        let runtime = MockDeploymentRuntime::new();
        let descriptor = build_descriptor(&demo(7), &settings()).unwrap();
        runtime.up(&descriptor, true, None).await.unwrap();
        runtime.hide_proxy(true);

        let discovery = discover_route("demo-7", &runtime, &settings()).await.unwrap();
        assert_eq!(discovery.route.status, RouteStatus::Stopped);
        assert_eq!(discovery.diagnosis, RouteDiagnosis::ProxyMissing);
    }

    #[tokio::test]
    async fn test_neighbouring_deployment_is_not_matched() {
        let runtime = MockDeploymentRuntime::new();
        let descriptor = build_descriptor(&demo(71), &settings()).unwrap();
        runtime.up(&descriptor, true, None).await.unwrap();

        let discovery = discover_route("demo-7", &runtime, &settings()).await.unwrap();
        assert_eq!(discovery.diagnosis, RouteDiagnosis::NeverStarted);
    }

    #[tokio::test]
    async fn test_runtime_failure_propagates() {
        let runtime = MockDeploymentRuntime::new();
        runtime.fail_on("list");
        let result = discover_route("demo-7", &runtime, &settings()).await;
        assert!(matches!(result, Err(RuntimeError::Unavailable(_))));
    }
}
