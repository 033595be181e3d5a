// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! App lifecycle commands
//!
//! Commands: create, copy, start, stop, restart, scale, update, delete,
//! logs, stats, show, list, refresh-scrapes

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

use crane_core::application::deployment::DeploymentService;
use crane_core::domain::app::{AppDraft, AppId, AppUpdate, AppWithRuntime, RouteStatus, UserId};
use crane_core::domain::crane_config::CraneConfigManifest;

use crate::wiring::Services;

#[derive(Subcommand)]
pub enum AppCommand {
    /// Create and start an app from a YAML definition
    Create {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Owning user id
        #[arg(long)]
        owner: i64,
    },

    /// Copy an app's desired state to another user (nothing is started)
    Copy {
        id: i64,

        /// Target user id
        #[arg(long)]
        to: i64,
    },

    /// Build and start an existing app
    Start { id: i64 },

    /// Stop an app's containers
    Stop { id: i64 },

    /// Restart an app's containers
    Restart { id: i64 },

    /// Run COUNT replicas of every service
    Scale { id: i64, count: u32 },

    /// Merge a partial YAML definition into the stored app
    Update {
        id: i64,

        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Tear down and delete an app
    Delete { id: i64 },

    /// Print a snapshot of the app's logs
    Logs { id: i64 },

    /// Print per-container resource usage
    Stats { id: i64 },

    /// Show an app with its live route
    Show {
        id: i64,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List apps with their live routes
    List {
        #[arg(long, default_value = "0")]
        skip: usize,

        #[arg(long, default_value = "50")]
        limit: usize,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Re-register scrape targets for every running app
    RefreshScrapes,
}

pub async fn handle_command(command: AppCommand, config: CraneConfigManifest, user: Option<i64>) -> Result<()> {
    let services = Services::new(config).await?;
    let deployments = services.deployment_service().await?;
    let user = user.map(UserId);

    match command {
        AppCommand::Create { file, owner } => {
            let draft: AppDraft = read_yaml(&file)?;
            let created = deployments
                .create(draft, UserId(owner))
                .await
                .context("Failed to create app")?;
            println!("{}", format!("✓ App created: {}", created.deployment_name).green());
            print_app(&created);
        }
        AppCommand::Copy { id, to } => {
            let copy = deployments
                .copy(AppId(id), user, UserId(to))
                .await
                .context("Failed to copy app")?;
            println!("{}", format!("✓ App {} copied to {} (id {})", id, copy.name, copy.id).green());
        }
        AppCommand::Start { id } => {
            deployments.start(AppId(id), user).await.context("Failed to start app")?;
            println!("{}", format!("✓ App {} started", id).green());
        }
        AppCommand::Stop { id } => {
            deployments.stop(AppId(id), user).await.context("Failed to stop app")?;
            println!("{}", format!("✓ App {} stopped", id).green());
        }
        AppCommand::Restart { id } => {
            deployments.restart(AppId(id), user).await.context("Failed to restart app")?;
            println!("{}", format!("✓ App {} restarted", id).green());
        }
        AppCommand::Scale { id, count } => {
            deployments
                .scale(AppId(id), user, count)
                .await
                .context("Failed to scale app")?;
            println!("{}", format!("✓ App {} scaled to {} replicas per service", id, count).green());
        }
        AppCommand::Update { id, file } => {
            let update: AppUpdate = read_yaml(&file)?;
            let app = deployments
                .update(AppId(id), user, update)
                .await
                .context("Failed to update app")?;
            println!("{}", format!("✓ App {} updated", app.id).green());
        }
        AppCommand::Delete { id } => {
            deployments.delete(AppId(id), user).await.context("Failed to delete app")?;
            println!("{}", format!("✓ App {} deleted", id).green());
        }
        AppCommand::Logs { id } => {
            let logs = deployments.logs(AppId(id), user).await.context("Failed to fetch logs")?;
            print!("{}", logs);
        }
        AppCommand::Stats { id } => {
            let usage = deployments.stats(AppId(id), user).await.context("Failed to fetch stats")?;
            println!("{:<40} {:>8} {:>12} {:>8}", "CONTAINER".bold(), "CPU %".bold(), "MEM".bold(), "MEM %".bold());
            for container in usage {
                println!(
                    "{:<40} {:>8.2} {:>10}Mi {:>8.2}",
                    container.container_name,
                    container.cpu_percent,
                    container.memory_usage_bytes / (1024 * 1024),
                    container.memory_percent
                );
            }
        }
        AppCommand::Show { id, json } => {
            let app = deployments
                .get_app_with_runtime(AppId(id), user)
                .await
                .context("Failed to load app")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&app)?);
            } else {
                print_app(&app);
            }
        }
        AppCommand::List { skip, limit, json } => {
            let apps = deployments
                .list_apps_with_runtime(user, skip, limit)
                .await
                .context("Failed to list apps")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&apps)?);
            } else if apps.is_empty() {
                println!("{}", "No apps found".dimmed());
            } else {
                for app in &apps {
                    println!(
                        "{:>6}  {:<30} {:<8} {}",
                        app.app.id,
                        app.deployment_name,
                        status_label(app.route.status),
                        app.route.address.as_deref().unwrap_or("-")
                    );
                }
            }
        }
        AppCommand::RefreshScrapes => {
            let registered = deployments
                .refresh_scrape_targets()
                .await
                .context("Failed to refresh scrape targets")?;
            println!("{}", format!("✓ {} scrape target(s) registered", registered).green());
        }
    }

    Ok(())
}

fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))
}

fn status_label(status: RouteStatus) -> colored::ColoredString {
    match status {
        RouteStatus::Running => "Running".green(),
        RouteStatus::Stopped => "Stopped".yellow(),
    }
}

fn print_app(app: &AppWithRuntime) {
    println!("{}", app.deployment_name.bold());
    println!("  ID: {}", app.app.id);
    println!("  Owner: {}", app.app.user_id);
    println!(
        "  Scale: {} (min {}, max {})",
        app.app.scale.current, app.app.scale.min, app.app.scale.max
    );
    println!("  Services:");
    for service in &app.app.services {
        println!("    - {} ({})", service.name, service.image);
    }
    if !app.app.hosts.is_empty() {
        println!("  Hosts:");
        for route in &app.app.hosts {
            println!("    - {} → {}:{}", route.host, route.service, route.port);
        }
    }
    println!("  Route: {}", status_label(app.route.status));
    if let Some(address) = &app.route.address {
        println!("    Address: {}", address);
    }
    for port in app.route.ports.iter().flatten() {
        match port.public_port {
            Some(public) => println!("    Port: {} → {}/{}", public, port.private_port, port.protocol),
            None => println!("    Port: {}/{}", port.private_port, port.protocol),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_yaml_draft() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.yaml");
        std::fs::write(
            &path,
            "name: demo\nservices:\n  - name: web\n    image: nginx:1.27\n    port: 80\nscale:\n  min: 1\n  current: 1\n  max: 3\n",
        )
        .unwrap();

        let draft: AppDraft = read_yaml(&path).unwrap();
        assert_eq!(draft.name, "demo");
        assert_eq!(draft.services[0].port, Some(80));
        assert!(draft.hosts.is_empty());
        assert!(draft.validate().is_ok());
    }
}
