// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::app::{AppId, RouteStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle state of a deployment.
///
/// `Absent → Created → Building → Running ⇄ Stopped → Removed`; `Scaling` is
/// a sub-state of `Running` and `Failed` is reachable from `Building` and
/// `Running` on adapter error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentPhase {
    Absent,
    Created,
    Building,
    Running,
    Scaling,
    Stopped,
    Removed,
    Failed,
}

impl fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentPhase::Absent => "absent",
            DeploymentPhase::Created => "created",
            DeploymentPhase::Building => "building",
            DeploymentPhase::Running => "running",
            DeploymentPhase::Scaling => "scaling",
            DeploymentPhase::Stopped => "stopped",
            DeploymentPhase::Removed => "removed",
            DeploymentPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeploymentEvent {
    PhaseChanged {
        app_id: AppId,
        deployment: String,
        from: DeploymentPhase,
        to: DeploymentPhase,
        changed_at: DateTime<Utc>,
    },
    RouteDiscovered {
        app_id: AppId,
        deployment: String,
        address: Option<String>,
        status: RouteStatus,
        discovered_at: DateTime<Utc>,
    },
    Scaled {
        app_id: AppId,
        deployment: String,
        replicas: u32,
        scaled_at: DateTime<Utc>,
    },
    OperationFailed {
        app_id: AppId,
        deployment: String,
        operation: String,
        error: String,
        failed_at: DateTime<Utc>,
    },
    ScrapeTargetsRefreshed {
        registered: usize,
        refreshed_at: DateTime<Utc>,
    },
}

impl DeploymentEvent {
    pub fn app_id(&self) -> Option<AppId> {
        match self {
            DeploymentEvent::PhaseChanged { app_id, .. }
            | DeploymentEvent::RouteDiscovered { app_id, .. }
            | DeploymentEvent::Scaled { app_id, .. }
            | DeploymentEvent::OperationFailed { app_id, .. } => Some(*app_id),
            DeploymentEvent::ScrapeTargetsRefreshed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PolicyEvent {
    RuleSetWritten {
        path: PathBuf,
        roles: usize,
        written_at: DateTime<Utc>,
    },
    PolicyPublished {
        policy_name: String,
        path: PathBuf,
        published_at: DateTime<Utc>,
    },
    PolicyPublishFailed {
        policy_name: String,
        error: String,
        failed_at: DateTime<Utc>,
    },
    StoreSeeded {
        source: PathBuf,
        roles: usize,
        permissions: usize,
        links: usize,
        seeded_at: DateTime<Utc>,
    },
}
