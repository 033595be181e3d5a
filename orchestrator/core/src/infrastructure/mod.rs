// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod db;
pub mod event_bus;
pub mod monitoring;
pub mod opa;
pub mod repositories;
pub mod rule_file;
pub mod runtime;
