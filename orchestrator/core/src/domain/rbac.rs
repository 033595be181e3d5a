// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Role / permission records owned by the relational store, and the ordered
//! role → grants mapping the policy subsystem works with.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionId(pub i64);

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PermissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub built_in: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub id: PermissionId,
    pub object: String,
    pub action: String,
    pub description: Option<String>,
}

/// Join row; `(role_id, permission_id)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermission {
    pub id: i64,
    pub role_id: RoleId,
    pub permission_id: PermissionId,
}

/// One `{action, object}` pair granted to a role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub action: String,
    pub object: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PermissionGrant {
    pub fn new(action: impl Into<String>, object: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            object: object.into(),
            description: None,
        }
    }
}

impl From<&Permission> for PermissionGrant {
    fn from(permission: &Permission) -> Self {
        Self::new(permission.action.clone(), permission.object.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrants {
    pub role: String,
    pub grants: Vec<PermissionGrant>,
}

impl RoleGrants {
    pub fn new(role: impl Into<String>, grants: Vec<PermissionGrant>) -> Self {
        Self {
            role: role.into(),
            grants,
        }
    }
}

/// Role → grants in role-iteration order.
pub type RolePermissionMap = Vec<RoleGrants>;
