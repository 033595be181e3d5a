// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod deployment;
pub mod policy_sync;
pub mod repository_factory;
pub mod route_discovery;

// Re-export services for convenience
pub use deployment::{DeploymentError, DeploymentService, StandardDeploymentService};
pub use policy_sync::{PolicySyncError, PolicySynthesizer, PublishReceipt, SeedSummary};
pub use repository_factory::{create_repositories, Repositories};
pub use route_discovery::{discover_route, RouteDiagnosis, RouteDiscovery};
