// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the Crane CLI

pub mod app;
pub mod config;
pub mod policy;

pub use self::app::AppCommand;
pub use self::config::ConfigCommand;
pub use self::policy::PolicyCommand;
