// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! # Crane Operator CLI
//!
//! The `crane` binary drives the orchestrator core directly: every command
//! builds the services it needs from the configuration manifest and exits.
//!
//! ## Commands
//!
//! - `crane app create|copy|start|stop|restart|scale|update|delete|logs|stats|show|list` - App lifecycle
//! - `crane policy publish|push-file|seed|check` - RBAC policy publication
//! - `crane config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::debug;

use crane_core::domain::crane_config::CraneConfigManifest;
use crane_orchestrator::commands::{self, AppCommand, ConfigCommand, PolicyCommand};

/// Crane - deploy compose apps and publish their access policy
#[derive(Parser)]
#[command(name = "crane")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "CRANE_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Defaults to spec.observability.logging.level
    #[arg(long, global = true, env = "CRANE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Act as this user; omit to act as an administrator
    #[arg(long, global = true, env = "CRANE_USER")]
    user: Option<i64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// App lifecycle
    #[command(name = "app")]
    App {
        #[command(subcommand)]
        command: AppCommand,
    },

    /// RBAC policy publication
    #[command(name = "policy")]
    Policy {
        #[command(subcommand)]
        command: PolicyCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Config { command }) => {
            // Config commands must work with a broken manifest, so they log at the flag level only.
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "compact")?;
            commands::config::handle_command(command, cli.config).await
        }
        Some(Commands::App { command }) => {
            let config = load_config(&cli.config, cli.log_level.as_deref())?;
            commands::app::handle_command(command, config, cli.user).await
        }
        Some(Commands::Policy { command }) => {
            let config = load_config(&cli.config, cli.log_level.as_deref())?;
            commands::policy::handle_command(command, config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

fn load_config(path: &Option<PathBuf>, log_level: Option<&str>) -> Result<CraneConfigManifest> {
    let config = CraneConfigManifest::load_or_default(path.clone()).context("Failed to load configuration")?;

    let logging = &config.spec.observability.logging;
    init_logging(log_level.unwrap_or(&logging.level), &logging.format)?;
    debug!(name = %config.metadata.name, "Configuration loaded");

    Ok(config)
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format == "json" {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
