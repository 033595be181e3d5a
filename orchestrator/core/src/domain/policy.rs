// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Policy decision service contract.
//!
//! A publish either replaces the active document for a name as a whole or
//! fails; there is no partial apply at this boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    /// Connection refused, DNS failure or request timeout
    #[error("Policy decision service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Policy decision service rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Policy '{0}' already exists and force was not set")]
    AlreadyExists(String),

    #[error("Failed to read rule-set {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unexpected response from policy decision service: {0}")]
    InvalidResponse(String),
}

/// Outcome of a successful push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushReceipt {
    pub policy_name: String,
    pub status: u16,
}

/// Query submitted to the decision service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationInput {
    pub roles: Vec<String>,
    pub action: String,
    pub object: String,
}

#[async_trait]
pub trait PolicyPublisher: Send + Sync {
    /// Upload the document at `path` under `policy_name`. With `force`, any
    /// existing document of that name is replaced unconditionally.
    async fn push(&self, policy_name: &str, path: &Path, force: bool) -> Result<PushReceipt, PolicyError>;

    /// Evaluate `input` against the rule at `rule_path` (e.g. `rbac/authz/allow`).
    async fn is_allowed(&self, rule_path: &str, input: &AuthorizationInput) -> Result<bool, PolicyError>;
}
