// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Compose Descriptor
//!
//! Pure translation of an [`App`]'s desired state into a runtime-consumable
//! multi-service descriptor. The descriptor is never persisted: every
//! lifecycle operation regenerates it from the stored row.
//!
//! The descriptor carries:
//! - one [`ServiceBlock`] per logical service, replicas defaulted to `current_scale`
//! - an optional reverse-proxy block (`{deployment}-{proxy}` once running)
//! - the host routing map, kept for the proxy and persisted back on create

use crate::domain::app::{validate_app_name, validate_service_name, App, HostRoute, ServiceDefinition, ValidationError};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;

pub const DEPLOYMENT_LABEL: &str = "crane.deployment";
pub const SERVICE_LABEL: &str = "crane.service";

/// Deployment-wide settings taken from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeSettings {
    /// Shared network joining proxies and the monitoring stack
    pub network: String,
    pub proxy: Option<ProxySettings>,
}

impl ComposeSettings {
    /// The proxy block shares the compose `services` mapping, so no logical
    /// service may take its name.
    pub fn check_service_names(&self, services: &[ServiceDefinition]) -> Result<(), ValidationError> {
        let Some(proxy) = &self.proxy else {
            return Ok(());
        };
        match services.iter().find(|service| service.name == proxy.service) {
            Some(service) => Err(ValidationError::ReservedServiceName(service.name.clone())),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    /// Compose service name; also the container-name suffix route discovery matches
    pub service: String,
    pub image: String,
    pub metrics_port: u16,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            service: "traefik".to_string(),
            image: "traefik:v2.11".to_string(),
            metrics_port: 8082,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Shell(String),
    Exec(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceBlock {
    pub name: String,
    pub image: String,
    pub command: Option<CommandSpec>,
    pub environment: BTreeMap<String, String>,
    pub volumes: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub ports: Vec<String>,
    pub networks: Vec<String>,
    pub replicas: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostTarget {
    pub service: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeDescriptor {
    /// Compose project name, equal to the app's deployment name
    pub project: String,
    pub network: String,
    pub services: Vec<ServiceBlock>,
    pub proxy: Option<ServiceBlock>,
    pub hosts: BTreeMap<String, HostTarget>,
}

/// Build the descriptor for `app`.
pub fn build_descriptor(app: &App, settings: &ComposeSettings) -> Result<ComposeDescriptor, ValidationError> {
    validate_app_name(&app.name)?;
    app.scale.validate()?;
    settings.check_service_names(&app.services)?;

    let project = app.deployment_name();
    let hosts = derive_hosts(app, &project)?;

    let mut services = Vec::with_capacity(app.services.len());
    for (index, service) in app.services.iter().enumerate() {
        validate_service_name(index, &service.name)?;
        if service.image.trim().is_empty() {
            return Err(ValidationError::EmptyImage(service.name.clone()));
        }
        if services.iter().any(|s: &ServiceBlock| s.name == service.name) {
            return Err(ValidationError::DuplicateService(service.name.clone()));
        }

        let mut labels = service.labels.clone();
        labels.insert(DEPLOYMENT_LABEL.to_string(), project.clone());
        labels.insert(SERVICE_LABEL.to_string(), service.name.clone());

        let routed: Vec<(&String, &HostTarget)> = hosts
            .iter()
            .filter(|(_, target)| target.service == service.name)
            .collect();
        if !routed.is_empty() && settings.proxy.is_some() {
            labels.insert("traefik.enable".to_string(), "true".to_string());
            labels.insert("traefik.docker.network".to_string(), settings.network.clone());
            for (index, (host, target)) in routed.iter().enumerate() {
                let router = format!("{}-{}-{}", project, service.name, index);
                let backend = format!("{}-{}-{}", project, service.name, target.port);
                labels.insert(format!("traefik.http.routers.{}.rule", router), format!("Host(`{}`)", host));
                labels.insert(format!("traefik.http.routers.{}.entrypoints", router), "web".to_string());
                labels.insert(format!("traefik.http.routers.{}.service", router), backend.clone());
                labels.insert(
                    format!("traefik.http.services.{}.loadbalancer.server.port", backend),
                    target.port.to_string(),
                );
            }
        }

        let mut networks = vec!["default".to_string()];
        if !routed.is_empty() {
            networks.push(settings.network.clone());
        }

        services.push(ServiceBlock {
            name: service.name.clone(),
            image: service.image.clone(),
            command: service.command.clone().map(CommandSpec::Shell),
            environment: service.environment.clone(),
            volumes: service.volumes.clone(),
            labels,
            ports: Vec::new(),
            networks,
            replicas: app.scale.current,
        });
    }
    if services.is_empty() {
        return Err(ValidationError::NoServices);
    }

    let proxy = settings.proxy.as_ref().map(|proxy| proxy_block(&project, &settings.network, proxy));

    Ok(ComposeDescriptor {
        project,
        network: settings.network.clone(),
        services,
        proxy,
        hosts,
    })
}

fn derive_hosts(app: &App, project: &str) -> Result<BTreeMap<String, HostTarget>, ValidationError> {
    let mut hosts = BTreeMap::new();
    for route in &app.hosts {
        if !app.services.iter().any(|s| s.name == route.service) {
            return Err(ValidationError::UnknownHostService {
                host: route.host.clone(),
                service: route.service.clone(),
            });
        }
        hosts.insert(
            route.host.clone(),
            HostTarget {
                service: route.service.clone(),
                port: route.port,
            },
        );
    }
    for service in &app.services {
        let Some(port) = service.port else { continue };
        if hosts.values().any(|target| target.service == service.name) {
            continue;
        }
        hosts.insert(
            format!("{}.{}.localhost", service.name, project),
            HostTarget {
                service: service.name.clone(),
                port,
            },
        );
    }
    Ok(hosts)
}

fn proxy_block(project: &str, network: &str, proxy: &ProxySettings) -> ServiceBlock {
    let mut labels = BTreeMap::new();
    labels.insert(DEPLOYMENT_LABEL.to_string(), project.to_string());
    labels.insert(SERVICE_LABEL.to_string(), proxy.service.clone());

    ServiceBlock {
        name: proxy.service.clone(),
        image: proxy.image.clone(),
        command: Some(CommandSpec::Exec(vec![
            "--providers.docker=true".to_string(),
            "--providers.docker.exposedbydefault=false".to_string(),
            format!(
                "--providers.docker.constraints=Label(`com.docker.compose.project`,`{}`)",
                project
            ),
            "--entrypoints.web.address=:80".to_string(),
            format!("--entrypoints.metrics.address=:{}", proxy.metrics_port),
            "--metrics.prometheus=true".to_string(),
            "--metrics.prometheus.entrypoint=metrics".to_string(),
        ])),
        environment: BTreeMap::new(),
        volumes: vec!["/var/run/docker.sock:/var/run/docker.sock:ro".to_string()],
        labels,
        ports: vec!["80".to_string()],
        networks: vec!["default".to_string(), network.to_string()],
        replicas: 1,
    }
}

impl ComposeDescriptor {
    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|s| s.name.as_str())
    }

    /// Replica map assigning `count` to every logical service (the proxy is never scaled).
    pub fn uniform_scale(&self, count: u32) -> BTreeMap<String, u32> {
        self.service_names().map(|name| (name.to_string(), count)).collect()
    }

    /// Host routes as persisted on the app row.
    pub fn host_routes(&self) -> Vec<HostRoute> {
        self.hosts
            .iter()
            .map(|(host, target)| HostRoute {
                host: host.clone(),
                service: target.service.clone(),
                port: target.port,
            })
            .collect()
    }

    /// Render as a compose file, keeping service declaration order.
    pub fn to_compose_yaml(&self) -> Result<String, serde_yaml::Error> {
        let mut services = Mapping::new();
        for block in self.services.iter().chain(self.proxy.iter()) {
            services.insert(Value::from(block.name.clone()), block.to_value()?);
        }

        let mut external = Mapping::new();
        external.insert(Value::from("external"), Value::from(true));
        let mut networks = Mapping::new();
        networks.insert(Value::from(self.network.clone()), Value::Mapping(external));

        let mut root = Mapping::new();
        root.insert(Value::from("name"), Value::from(self.project.clone()));
        root.insert(Value::from("services"), Value::Mapping(services));
        root.insert(Value::from("networks"), Value::Mapping(networks));
        serde_yaml::to_string(&Value::Mapping(root))
    }
}

impl ServiceBlock {
    fn to_value(&self) -> Result<Value, serde_yaml::Error> {
        let mut block = Mapping::new();
        block.insert(Value::from("image"), Value::from(self.image.clone()));
        if let Some(command) = &self.command {
            block.insert(Value::from("command"), serde_yaml::to_value(command)?);
        }
        if !self.environment.is_empty() {
            block.insert(Value::from("environment"), serde_yaml::to_value(&self.environment)?);
        }
        if !self.volumes.is_empty() {
            block.insert(Value::from("volumes"), serde_yaml::to_value(&self.volumes)?);
        }
        if !self.labels.is_empty() {
            block.insert(Value::from("labels"), serde_yaml::to_value(&self.labels)?);
        }
        if !self.ports.is_empty() {
            block.insert(Value::from("ports"), serde_yaml::to_value(&self.ports)?);
        }
        block.insert(Value::from("networks"), serde_yaml::to_value(&self.networks)?);

        let mut deploy = Mapping::new();
        deploy.insert(Value::from("replicas"), Value::from(self.replicas));
        block.insert(Value::from("deploy"), Value::Mapping(deploy));
        Ok(Value::Mapping(block))
    }
}
