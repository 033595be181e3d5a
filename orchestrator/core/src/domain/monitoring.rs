// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Monitoring side-system contract: one scrape-target declaration per
//! deployment, plus a coarse reload of the monitoring stack.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MonitoringError {
    #[error("Failed to write scrape target for {deployment}: {message}")]
    Io { deployment: String, message: String },

    #[error("Monitoring stack unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait MonitoringRegistrar: Send + Sync {
    /// Write (or overwrite) the scrape target for `deployment`.
    async fn register_scrape_target(&self, deployment: &str, address: &str) -> Result<(), MonitoringError>;

    /// Remove the scrape target; absent targets are not an error.
    async fn unregister_scrape_target(&self, deployment: &str) -> Result<(), MonitoringError>;

    /// Restart the monitoring stack so file changes are picked up. Blocking and coarse.
    async fn reload(&self) -> Result<(), MonitoringError>;
}
