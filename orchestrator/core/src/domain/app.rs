// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0
//! # App Aggregate
//!
//! Desired state of a multi-service deployment as persisted in the relational
//! store, plus the observed routing state computed per request.
//!
//! The runtime identity of an app is `{name}-{id}`; it only exists once the
//! row has been persisted and an id assigned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppId(pub i64);

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rejected desired-state input. Raised before any external call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("app name cannot be empty")]
    EmptyAppName,

    #[error("app name '{0}' must be lowercase letters, digits, '-' or '_', starting with a letter or digit")]
    InvalidAppName(String),

    #[error("service at position {0} has no name")]
    EmptyServiceName(usize),

    #[error("service name '{0}' must be lowercase letters, digits, '-' or '_', starting with a letter or digit")]
    InvalidServiceName(String),

    #[error("service name '{0}' is reserved for the reverse proxy")]
    ReservedServiceName(String),

    #[error("service '{0}' has no image")]
    EmptyImage(String),

    #[error("service '{0}' is declared more than once")]
    DuplicateService(String),

    #[error("app must declare at least one service")]
    NoServices,

    #[error("scale bounds out of order: min={min}, current={current}, max={max}")]
    ScaleBounds { min: u32, current: u32, max: u32 },

    #[error("scale {requested} outside of bounds [{min}, {max}]")]
    ScaleOutOfRange { requested: u32, min: u32, max: u32 },

    #[error("host '{host}' routes to unknown service '{service}'")]
    UnknownHostService { host: String, service: String },
}

/// One logical service of an app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Container port the reverse proxy forwards to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl ServiceDefinition {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command: None,
            environment: BTreeMap::new(),
            volumes: Vec::new(),
            labels: BTreeMap::new(),
            port: None,
        }
    }
}

/// Public hostname routed by the reverse proxy to a service port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRoute {
    pub host: String,
    pub service: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleBounds {
    pub min: u32,
    pub current: u32,
    pub max: u32,
}

impl ScaleBounds {
    pub fn new(min: u32, current: u32, max: u32) -> Result<Self, ValidationError> {
        let bounds = Self { min, current, max };
        bounds.validate()?;
        Ok(bounds)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.min <= self.current && self.current <= self.max {
            Ok(())
        } else {
            Err(ValidationError::ScaleBounds {
                min: self.min,
                current: self.current,
                max: self.max,
            })
        }
    }

    pub fn check(&self, requested: u32) -> Result<(), ValidationError> {
        if requested < self.min || requested > self.max {
            return Err(ValidationError::ScaleOutOfRange {
                requested,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

impl Default for ScaleBounds {
    fn default() -> Self {
        Self { min: 1, current: 1, max: 2 }
    }
}

/// Desired state submitted for a new app; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppDraft {
    pub name: String,
    pub services: Vec<ServiceDefinition>,
    #[serde(default)]
    pub hosts: Vec<HostRoute>,
    #[serde(default)]
    pub scale: ScaleBounds,
    #[serde(default)]
    pub force_stop: bool,
}

impl AppDraft {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_app_name(&self.name)?;
        validate_services(&self.services, &self.hosts)?;
        self.scale.validate()
    }
}

/// Names end up in `docker compose -p {name}-{id}`, container names and
/// hostnames, so both app and service names follow the compose project grammar.
fn is_compose_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

pub(crate) fn validate_app_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyAppName);
    }
    if !is_compose_name(name) {
        return Err(ValidationError::InvalidAppName(name.to_string()));
    }
    Ok(())
}

pub(crate) fn validate_service_name(index: usize, name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyServiceName(index));
    }
    if !is_compose_name(name) {
        return Err(ValidationError::InvalidServiceName(name.to_string()));
    }
    Ok(())
}

/// Persisted app row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub id: AppId,
    pub name: String,
    pub services: Vec<ServiceDefinition>,
    pub hosts: Vec<HostRoute>,
    pub scale: ScaleBounds,
    pub force_stop: bool,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl App {
    pub fn from_draft(id: AppId, user_id: UserId, draft: AppDraft) -> Self {
        let now = Utc::now();
        Self {
            id,
            name: draft.name,
            services: draft.services,
            hosts: draft.hosts,
            scale: draft.scale,
            force_stop: draft.force_stop,
            user_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Runtime identity shared by every container, network and file of the deployment.
    pub fn deployment_name(&self) -> String {
        format!("{}-{}", self.name, self.id)
    }

    /// Desired state to clone into a new row owned by `user_id`.
    ///
    /// Default hosts derived for this deployment (`*.{deployment}.localhost`)
    /// are dropped so the copy derives its own on create.
    pub fn copy_draft(&self) -> AppDraft {
        let derived_suffix = format!(".{}.localhost", self.deployment_name());
        AppDraft {
            name: format!("{}-copy", self.name),
            services: self.services.clone(),
            hosts: self
                .hosts
                .iter()
                .filter(|route| !route.host.ends_with(&derived_suffix))
                .cloned()
                .collect(),
            scale: self.scale,
            force_stop: self.force_stop,
        }
    }

    /// Merge the provided fields into this row.
    ///
    /// Every mergeable field is listed here; the result is re-validated before
    /// anything is written back, so a failed merge leaves `self` untouched.
    pub fn apply_update(&mut self, update: AppUpdate) -> Result<(), ValidationError> {
        let AppUpdate {
            services,
            hosts,
            min_scale,
            current_scale,
            max_scale,
            force_stop,
        } = update;

        let services = services.unwrap_or_else(|| self.services.clone());
        let hosts = hosts.unwrap_or_else(|| self.hosts.clone());
        let scale = ScaleBounds {
            min: min_scale.unwrap_or(self.scale.min),
            current: current_scale.unwrap_or(self.scale.current),
            max: max_scale.unwrap_or(self.scale.max),
        };

        validate_services(&services, &hosts)?;
        scale.validate()?;

        self.services = services;
        self.hosts = hosts;
        self.scale = scale;
        if let Some(force_stop) = force_stop {
            self.force_stop = force_stop;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Partial update of an app's desired state; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppUpdate {
    #[serde(default)]
    pub services: Option<Vec<ServiceDefinition>>,
    #[serde(default)]
    pub hosts: Option<Vec<HostRoute>>,
    #[serde(default)]
    pub min_scale: Option<u32>,
    #[serde(default)]
    pub current_scale: Option<u32>,
    #[serde(default)]
    pub max_scale: Option<u32>,
    #[serde(default)]
    pub force_stop: Option<bool>,
}

fn validate_services(services: &[ServiceDefinition], hosts: &[HostRoute]) -> Result<(), ValidationError> {
    if services.is_empty() {
        return Err(ValidationError::NoServices);
    }
    let mut seen = std::collections::BTreeSet::new();
    for (index, service) in services.iter().enumerate() {
        validate_service_name(index, &service.name)?;
        if service.image.trim().is_empty() {
            return Err(ValidationError::EmptyImage(service.name.clone()));
        }
        if !seen.insert(service.name.as_str()) {
            return Err(ValidationError::DuplicateService(service.name.clone()));
        }
    }
    for route in hosts {
        if !seen.contains(route.service.as_str()) {
            return Err(ValidationError::UnknownHostService {
                host: route.host.clone(),
                service: route.service.clone(),
            });
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RouteStatus {
    Running,
    Stopped,
}

impl fmt::Display for RouteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteStatus::Running => f.write_str("Running"),
            RouteStatus::Stopped => f.write_str("Stopped"),
        }
    }
}

/// Published port of the routing front-end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPort {
    pub private_port: u16,
    pub public_port: Option<u16>,
    pub protocol: String,
}

/// Observed state of a deployment's reverse proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRoute {
    pub address: Option<String>,
    pub ports: Option<Vec<PublishedPort>>,
    pub status: RouteStatus,
}

impl ProxyRoute {
    pub fn stopped() -> Self {
        Self {
            address: None,
            ports: None,
            status: RouteStatus::Stopped,
        }
    }
}

/// App row joined with its discovered route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppWithRuntime {
    #[serde(flatten)]
    pub app: App,
    pub deployment_name: String,
    pub route: ProxyRoute,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_app() -> App {
        App::from_draft(
            AppId(7),
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
    fn test_deployment_name_uses_id_suffix() {
        assert_eq!(demo_app().deployment_name(), "demo-7");
    }

    #[test]
    fn test_scale_bounds_validation() {
        assert!(ScaleBounds::new(1, 2, 3).is_ok());
        assert_eq!(
            ScaleBounds::new(2, 1, 3),
            Err(ValidationError::ScaleBounds { min: 2, current: 1, max: 3 })
        );
        let bounds = ScaleBounds::new(1, 1, 3).unwrap();
        assert!(bounds.check(3).is_ok());
        assert!(matches!(bounds.check(4), Err(ValidationError::ScaleOutOfRange { .. })));
        assert!(matches!(bounds.check(0), Err(ValidationError::ScaleOutOfRange { .. })));
    }

    #[test]
    fn test_draft_rejects_missing_image_and_duplicates() {
        let mut draft = demo_app().copy_draft();
        draft.services.push(ServiceDefinition::new("web", "y"));
        assert_eq!(draft.validate(), Err(ValidationError::DuplicateService("web".into())));

        draft.services = vec![ServiceDefinition::new("api", " ")];
        assert_eq!(draft.validate(), Err(ValidationError::EmptyImage("api".into())));

        draft.services = vec![ServiceDefinition::new("", "img")];
        assert_eq!(draft.validate(), Err(ValidationError::EmptyServiceName(0)));
    }

    #[test]
    fn test_draft_rejects_host_for_unknown_service() {
        let mut draft = demo_app().copy_draft();
        draft.hosts.push(HostRoute {
            host: "demo.example.com".into(),
            service: "api".into(),
            port: 80,
        });
        assert!(matches!(draft.validate(), Err(ValidationError::UnknownHostService { .. })));
    }

    #[test]
    fn test_apply_update_merges_only_provided_fields() {
        let mut app = demo_app();
        app.apply_update(AppUpdate {
            max_scale: Some(5),
            current_scale: Some(4),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(app.scale, ScaleBounds { min: 1, current: 4, max: 5 });
        assert_eq!(app.services.len(), 1);
        assert!(!app.force_stop);
    }

    #[test]
    fn test_apply_update_invalid_leaves_row_untouched() {
        let mut app = demo_app();
        let before = app.clone();
        let result = app.apply_update(AppUpdate {
            current_scale: Some(9),
            force_stop: Some(true),
            ..Default::default()
        });

        assert!(result.is_err());
        assert_eq!(app, before);
    }

    #[test]
    fn test_copy_draft_keeps_desired_state() {
        let app = demo_app();
        let draft = app.copy_draft();
        assert_eq!(draft.name, "demo-copy");
        assert_eq!(draft.services, app.services);
        assert_eq!(draft.scale, app.scale);
    }

    #[test]
    fn test_names_follow_compose_project_grammar() {
        let mut draft = demo_app().copy_draft();
        draft.name = "My App".to_string();
        assert_eq!(draft.validate(), Err(ValidationError::InvalidAppName("My App".into())));

        draft.name = "-demo".to_string();
        assert!(matches!(draft.validate(), Err(ValidationError::InvalidAppName(_))));

        draft.name = "demo_2".to_string();
        draft.services = vec![ServiceDefinition::new("Web Server", "nginx")];
        assert_eq!(
            draft.validate(),
            Err(ValidationError::InvalidServiceName("Web Server".into()))
        );

        draft.services = vec![ServiceDefinition::new("web-1", "nginx")];
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn test_apply_update_rejects_invalid_service_name() {
        let mut app = demo_app();
        let result = app.apply_update(AppUpdate {
            services: Some(vec![ServiceDefinition::new("api.v2", "x")]),
            ..Default::default()
        });
        assert_eq!(result, Err(ValidationError::InvalidServiceName("api.v2".into())));
    }

    #[test]
    fn test_copy_draft_drops_hosts_derived_for_source() {
        let mut app = demo_app();
        app.hosts = vec![
            HostRoute {
                host: "web.demo-7.localhost".into(),
                service: "web".into(),
                port: 80,
            },
            HostRoute {
                host: "demo.example.com".into(),
                service: "web".into(),
                port: 80,
            },
        ];

        let draft = app.copy_draft();
        assert_eq!(draft.hosts.len(), 1);
        assert_eq!(draft.hosts[0].host, "demo.example.com");
    }
}
