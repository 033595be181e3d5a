// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Crane core
//!
//! Application lifecycle orchestration over `docker compose` and RBAC policy
//! synthesis for Open Policy Agent.
//!
//! # Architecture
//!
//! - **domain:** aggregates, value objects and the traits external systems implement
//! - **application:** `StandardDeploymentService` and `PolicySynthesizer`
//! - **infrastructure:** Docker, PostgreSQL, OPA and filesystem adapters

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
