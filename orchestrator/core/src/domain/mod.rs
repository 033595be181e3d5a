// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: aggregates, pure transforms, and the contracts the
//! infrastructure layer implements.

pub mod app;
pub mod compose;
pub mod crane_config;
pub mod events;
pub mod monitoring;
pub mod policy;
pub mod rbac;
pub mod repository;
pub mod rule_set;
pub mod runtime;
