// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Crane CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Command definitions and the wiring that builds core services

pub mod commands;
pub mod wiring;
