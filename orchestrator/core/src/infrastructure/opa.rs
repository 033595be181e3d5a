// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Open Policy Agent Client
//!
//! Implements the `PolicyPublisher` trait against OPA's REST API.
//!
//! # API Endpoints
//!
//! - `PUT /v1/policies/{name}` - Create or replace a policy module (`text/plain` body)
//! - `GET /v1/policies/{name}` - Fetch a policy module (404 if absent)
//! - `POST /v1/data/{path}` - Evaluate a rule with `{"input": ...}`

use crate::domain::policy::{AuthorizationInput, PolicyError, PolicyPublisher, PushReceipt};
use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

pub struct OpaPolicyClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct DataResponse {
    result: Option<serde_json::Value>,
}

impl OpaPolicyClient {
    /// # Arguments
    /// * `base_url` - OPA server root (e.g., "http://localhost:8181")
    /// * `timeout` - Per-request deadline; expiry surfaces as `ServiceUnavailable`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PolicyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PolicyError::ServiceUnavailable(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn exists(&self, policy_name: &str) -> Result<bool, PolicyError> {
        let response = self
            .client
            .get(self.build_url(&format!("/v1/policies/{}", policy_name)))
            .send()
            .await
            .map_err(transport_error)?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(rejected(status, response).await),
        }
    }
}

fn transport_error(err: reqwest::Error) -> PolicyError {
    if err.is_decode() {
        PolicyError::InvalidResponse(err.to_string())
    } else {
        PolicyError::ServiceUnavailable(err.to_string())
    }
}

async fn rejected(status: StatusCode, response: reqwest::Response) -> PolicyError {
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| format!("HTTP {}", status));
    PolicyError::Rejected {
        status: status.as_u16(),
        body,
    }
}

#[async_trait]
impl PolicyPublisher for OpaPolicyClient {
    async fn push(&self, policy_name: &str, path: &Path, force: bool) -> Result<PushReceipt, PolicyError> {
        let document = tokio::fs::read_to_string(path).await.map_err(|source| PolicyError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if !force && self.exists(policy_name).await? {
            return Err(PolicyError::AlreadyExists(policy_name.to_string()));
        }

        debug!(policy_name, path = %path.display(), force, "Pushing policy");
        let response = self
            .client
            .put(self.build_url(&format!("/v1/policies/{}", policy_name)))
            .header(header::CONTENT_TYPE, "text/plain")
            .body(document)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(rejected(status, response).await);
        }

        info!(policy_name, status = status.as_u16(), "Policy published");
        Ok(PushReceipt {
            policy_name: policy_name.to_string(),
            status: status.as_u16(),
        })
    }

    async fn is_allowed(&self, rule_path: &str, input: &AuthorizationInput) -> Result<bool, PolicyError> {
        let response = self
            .client
            .post(self.build_url(&format!("/v1/data/{}", rule_path.trim_start_matches('/'))))
            .json(&serde_json::json!({ "input": input }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(rejected(status, response).await);
        }

        let data: DataResponse = response.json().await.map_err(transport_error)?;
        match data.result {
            // Undefined rule result: treat as deny
            None => Ok(false),
            Some(serde_json::Value::Bool(allowed)) => Ok(allowed),
            Some(other) => Err(PolicyError::InvalidResponse(format!(
                "expected boolean at {}, got {}",
                rule_path, other
            ))),
        }
    }
}

// Re-export MockPolicyPublisher for testing
pub use mock::{MockPolicyPublisher, RecordedPush};

mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct RecordedPush {
        pub policy_name: String,
        pub path: PathBuf,
        pub force: bool,
        pub document: String,
    }

    /// Records every push and answers `is_allowed` from a fixed verdict.
    #[derive(Clone, Default)]
    pub struct MockPolicyPublisher {
        pushes: Arc<Mutex<Vec<RecordedPush>>>,
        unavailable: Arc<Mutex<bool>>,
        verdict: Arc<Mutex<bool>>,
    }

    impl MockPolicyPublisher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn pushes(&self) -> Vec<RecordedPush> {
            self.pushes.lock().clone()
        }

        pub fn set_unavailable(&self, unavailable: bool) {
            *self.unavailable.lock() = unavailable;
        }

        pub fn set_verdict(&self, allowed: bool) {
            *self.verdict.lock() = allowed;
        }
    }

    #[async_trait]
    impl PolicyPublisher for MockPolicyPublisher {
        async fn push(&self, policy_name: &str, path: &Path, force: bool) -> Result<PushReceipt, PolicyError> {
            if *self.unavailable.lock() {
                return Err(PolicyError::ServiceUnavailable("connection refused".to_string()));
            }
            let document = tokio::fs::read_to_string(path).await.map_err(|source| PolicyError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let mut pushes = self.pushes.lock();
            if !force && pushes.iter().any(|p| p.policy_name == policy_name) {
                return Err(PolicyError::AlreadyExists(policy_name.to_string()));
            }
            pushes.push(RecordedPush {
                policy_name: policy_name.to_string(),
                path: path.to_path_buf(),
                force,
                document,
            });
            Ok(PushReceipt {
                policy_name: policy_name.to_string(),
                status: 200,
            })
        }

        async fn is_allowed(&self, _rule_path: &str, _input: &AuthorizationInput) -> Result<bool, PolicyError> {
            if *self.unavailable.lock() {
                return Err(PolicyError::ServiceUnavailable("connection refused".to_string()));
            }
            Ok(*self.verdict.lock())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("policy.rego");
        std::fs::write(&path, "package rbac.authz\n").unwrap();
        path
    }

    #[tokio::test]
    async fn test_force_push_puts_plain_text() {
        let mut server = mockito::Server::new_async().await;
        let put = server
            .mock("PUT", "/v1/policies/rbac")
            .match_header("content-type", "text/plain")
            .match_body("package rbac.authz\n")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();

        let client = OpaPolicyClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let receipt = client.push("rbac", &rule_file(&dir), true).await.unwrap();

        assert_eq!(receipt.status, 200);
        put.assert_async().await;
    }

    #[tokio::test]
    async fn test_push_without_force_refuses_existing_policy() {
        let mut server = mockito::Server::new_async().await;
        let get = server
            .mock("GET", "/v1/policies/rbac")
            .with_status(200)
            .with_body(r#"{"result": {"id": "rbac"}}"#)
            .create_async()
            .await;
        let put = server.mock("PUT", "/v1/policies/rbac").expect(0).create_async().await;
        let dir = tempfile::tempdir().unwrap();

        let client = OpaPolicyClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let result = client.push("rbac", &rule_file(&dir), false).await;

        assert!(matches!(result, Err(PolicyError::AlreadyExists(name)) if name == "rbac"));
        get.assert_async().await;
        put.assert_async().await;
    }

    #[tokio::test]
    async fn test_compile_error_is_rejected_with_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PUT", "/v1/policies/rbac")
            .with_status(400)
            .with_body(r#"{"code": "invalid_parameter"}"#)
            .create_async()
            .await;
        let dir = tempfile::tempdir().unwrap();

        let client = OpaPolicyClient::new(server.url(), Duration::from_secs(5)).unwrap();
        match client.push("rbac", &rule_file(&dir), true).await {
            Err(PolicyError::Rejected { status, body }) => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_parameter"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let client = OpaPolicyClient::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let result = client.push("rbac", &rule_file(&dir), true).await;
        assert!(matches!(result, Err(PolicyError::ServiceUnavailable(_))));
    }

    #[tokio::test]
    async fn test_is_allowed_reads_result() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/data/rbac/authz/allow")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "input": {"roles": ["admin"], "action": "GET", "object": "APPS"}
            })))
            .with_status(200)
            .with_body(r#"{"result": true}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/v1/data/rbac/authz/undefined")
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await;

        let client = OpaPolicyClient::new(server.url(), Duration::from_secs(5)).unwrap();
        let input = AuthorizationInput {
            roles: vec!["admin".to_string()],
            action: "GET".to_string(),
            object: "APPS".to_string(),
        };
        assert!(client.is_allowed("rbac/authz/allow", &input).await.unwrap());
        assert!(!client.is_allowed("rbac/authz/undefined", &input).await.unwrap());
    }
}
