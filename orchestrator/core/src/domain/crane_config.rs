// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0

// Crane Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing:
// - relational store connection (absent = in-memory repositories)
// - container runtime and compose working directory
// - routing network and reverse-proxy settings
// - monitoring scrape-target directory
// - policy decision service and rule-set output directory
// - logging

use crate::domain::compose::{ComposeSettings, ProxySettings};
use crate::domain::repository::{PostgresConfig, StorageBackend};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const API_VERSION: &str = "crane.io/v1";
pub const KIND: &str = "CraneConfig";

/// Top-level configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CraneConfigManifest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: CraneConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CraneConfigSpec {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub routing: RoutingConfig,

    #[serde(default)]
    pub monitoring: MonitoringConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection string; in-memory repositories are used when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Path to the Docker socket. Default: platform default of the Docker client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docker_socket_path: Option<String>,

    /// Directory holding one `{deployment}/docker-compose.yml` per in-flight operation
    #[serde(default = "default_compose_dir")]
    pub compose_dir: PathBuf,

    /// Binary invoked as `{compose_binary} compose ...`
    #[serde(default = "default_compose_binary")]
    pub compose_binary: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            docker_socket_path: None,
            compose_dir: default_compose_dir(),
            compose_binary: default_compose_binary(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// External network shared by every reverse proxy and the monitoring stack
    #[serde(default = "default_network")]
    pub network: String,

    #[serde(default = "default_true")]
    pub proxy_enabled: bool,

    #[serde(default)]
    pub proxy: ProxySettings,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            proxy_enabled: true,
            proxy: ProxySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Restart the monitoring stack after target changes. Disable when the
    /// collector watches `scrape_dir` on its own.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus `file_sd` directory
    #[serde(default = "default_scrape_dir")]
    pub scrape_dir: PathBuf,

    /// Compose project of the monitoring stack, restarted on reload
    #[serde(default = "default_monitoring_project")]
    pub compose_project: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scrape_dir: default_scrape_dir(),
            compose_project: default_monitoring_project(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_opa_url")]
    pub opa_url: String,

    /// Name the rule-set is published under
    #[serde(default = "default_policy_name")]
    pub policy_name: String,

    /// Rule-set output directory. Required; there is no built-in location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,

    /// Rule-set used by `policy seed` and `policy push-file` when no path is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_file: Option<PathBuf>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            opa_url: default_opa_url(),
            policy_name: default_policy_name(),
            output_dir: None,
            seed_file: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    /// "compact" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> u32 {
    5
}

fn default_compose_dir() -> PathBuf {
    PathBuf::from("/var/lib/crane/compose")
}

fn default_compose_binary() -> String {
    "docker".to_string()
}

fn default_network() -> String {
    "crane".to_string()
}

fn default_scrape_dir() -> PathBuf {
    PathBuf::from("/var/lib/crane/prometheus/targets")
}

fn default_monitoring_project() -> String {
    "monitoring".to_string()
}

fn default_opa_url() -> String {
    "http://localhost:8181".to_string()
}

fn default_policy_name() -> String {
    "rbac".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

impl Default for CraneConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "crane".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: CraneConfigSpec::default(),
        }
    }
}

impl CraneConfigManifest {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. CRANE_CONFIG_PATH environment variable
    /// 2. ./crane-config.yaml (working directory)
    /// 3. ~/.crane/config.yaml (user home)
    /// 4. /etc/crane/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("CRANE_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./crane-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".crane").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/crane/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("CRANE_DATABASE_URL") {
            tracing::info!("Environment override: CRANE_DATABASE_URL");
            self.spec.database.url = Some(url);
        }
        if let Some(url) = lookup("CRANE_OPA_URL") {
            tracing::info!("Environment override: CRANE_OPA_URL={}", url);
            self.spec.policy.opa_url = url;
        }
        if let Some(dir) = lookup("CRANE_POLICY_OUTPUT_DIR") {
            tracing::info!("Environment override: CRANE_POLICY_OUTPUT_DIR={}", dir);
            self.spec.policy.output_dir = Some(PathBuf::from(dir));
        }
        if let Some(socket) = lookup("CRANE_DOCKER_SOCKET") {
            tracing::info!("Environment override: CRANE_DOCKER_SOCKET={}", socket);
            self.spec.runtime.docker_socket_path = Some(socket);
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        match &self.spec.policy.output_dir {
            None => anyhow::bail!("spec.policy.output_dir is required"),
            Some(dir) if dir.as_os_str().is_empty() => {
                anyhow::bail!("spec.policy.output_dir cannot be empty")
            }
            Some(_) => {}
        }

        if self.spec.policy.policy_name.is_empty() {
            anyhow::bail!("spec.policy.policy_name cannot be empty");
        }

        let opa = url::Url::parse(&self.spec.policy.opa_url)
            .map_err(|e| anyhow::anyhow!("Invalid spec.policy.opa_url '{}': {}", self.spec.policy.opa_url, e))?;
        if !matches!(opa.scheme(), "http" | "https") {
            anyhow::bail!("spec.policy.opa_url must be http(s), got '{}'", opa.scheme());
        }

        if self.spec.runtime.compose_dir.as_os_str().is_empty() {
            anyhow::bail!("spec.runtime.compose_dir cannot be empty");
        }

        if self.spec.monitoring.scrape_dir.as_os_str().is_empty() {
            anyhow::bail!("spec.monitoring.scrape_dir cannot be empty");
        }

        if self.spec.routing.network.is_empty() {
            anyhow::bail!("spec.routing.network cannot be empty");
        }

        if self.spec.routing.proxy.service.is_empty() {
            anyhow::bail!("spec.routing.proxy.service cannot be empty");
        }

        if !matches!(self.spec.observability.logging.format.as_str(), "compact" | "json") {
            anyhow::bail!(
                "Invalid spec.observability.logging.format: '{}'. Expected compact or json",
                self.spec.observability.logging.format
            );
        }

        Ok(())
    }

    pub fn compose_settings(&self) -> ComposeSettings {
        ComposeSettings {
            network: self.spec.routing.network.clone(),
            proxy: self
                .spec
                .routing
                .proxy_enabled
                .then(|| self.spec.routing.proxy.clone()),
        }
    }

    pub fn storage_backend(&self) -> StorageBackend {
        match &self.spec.database.url {
            Some(url) => StorageBackend::PostgreSQL(PostgresConfig {
                connection_string: url.clone(),
                max_connections: self.spec.database.max_connections,
            }),
            None => StorageBackend::InMemory,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> CraneConfigManifest {
        let mut manifest = CraneConfigManifest::default();
        manifest.spec.policy.output_dir = Some(PathBuf::from("/tmp/policies"));
        manifest
    }

    #[test]
    fn test_default_manifest() {
        let manifest = CraneConfigManifest::default();
        assert_eq!(manifest.api_version, "crane.io/v1");
        assert_eq!(manifest.kind, "CraneConfig");
        assert!(!manifest.metadata.name.is_empty());
        assert_eq!(manifest.spec.routing.proxy.service, "traefik");
        assert!(matches!(manifest.storage_backend(), StorageBackend::InMemory));
    }

    #[test]
    fn test_minimal_yaml_fills_defaults() {
        let yaml = r#"
apiVersion: crane.io/v1
kind: CraneConfig
metadata:
  name: dev
spec:
  policy:
    output_dir: ./policies
  routing:
    network: prometheus_default
"#;
        let manifest = CraneConfigManifest::from_yaml_str(yaml).unwrap();
        assert!(manifest.validate().is_ok());
        assert_eq!(manifest.spec.policy.request_timeout_secs, 30);
        assert_eq!(manifest.spec.policy.opa_url, "http://localhost:8181");
        assert_eq!(manifest.spec.routing.network, "prometheus_default");
        assert_eq!(manifest.compose_settings().network, "prometheus_default");
    }

    #[test]
    fn test_validation() {
        let mut manifest = valid();
        assert!(manifest.validate().is_ok());

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.spec.policy.output_dir = None;
        assert!(manifest.validate().is_err());
        manifest.spec.policy.output_dir = Some(PathBuf::from("/tmp/policies"));

        manifest.spec.policy.opa_url = "not a url".to_string();
        assert!(manifest.validate().is_err());
        manifest.spec.policy.opa_url = "ftp://opa:8181".to_string();
        assert!(manifest.validate().is_err());
        manifest.spec.policy.opa_url = "https://opa.internal".to_string();

        manifest.spec.routing.network.clear();
        assert!(manifest.validate().is_err());
        manifest.spec.routing.network = "crane".to_string();

        manifest.spec.observability.logging.format = "pretty".to_string();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut manifest = CraneConfigManifest::default();
        let env: HashMap<&str, &str> = HashMap::from([
            ("CRANE_DATABASE_URL", "postgres://crane@db/crane"),
            ("CRANE_OPA_URL", "http://opa:8181"),
            ("CRANE_POLICY_OUTPUT_DIR", "/srv/policies"),
        ]);
        manifest.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(manifest.spec.policy.opa_url, "http://opa:8181");
        assert_eq!(manifest.spec.policy.output_dir, Some(PathBuf::from("/srv/policies")));
        assert!(manifest.spec.runtime.docker_socket_path.is_none());
        match manifest.storage_backend() {
            StorageBackend::PostgreSQL(cfg) => assert_eq!(cfg.connection_string, "postgres://crane@db/crane"),
            other => panic!("expected postgres backend, got {:?}", other),
        }
    }

    #[test]
    fn test_proxy_disabled_drops_proxy_settings() {
        let mut manifest = valid();
        manifest.spec.routing.proxy_enabled = false;
        assert!(manifest.compose_settings().proxy.is_none());
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crane-config.yaml");
        valid().to_yaml_file(&path).unwrap();

        let loaded = CraneConfigManifest::load_or_default(Some(path)).unwrap();
        assert_eq!(loaded.spec.policy.output_dir, Some(PathBuf::from("/tmp/policies")));
    }
}
