// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use crane_core::domain::crane_config::CraneConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./crane-config.yaml)
        #[arg(short, long, default_value = "./crane-config.yaml")]
        output: PathBuf,

        /// Rule-set output directory to put in the sample
        #[arg(long, default_value = "/var/lib/crane/policies")]
        policy_dir: PathBuf,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file } => validate(file.or(config_override)),
        ConfigCommand::Generate { output, policy_dir } => generate(output, policy_dir),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = CraneConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. CRANE_CONFIG_PATH: {}",
            std::env::var("CRANE_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./crane-config.yaml");
        println!("  4. ~/.crane/config.yaml");
        println!("  5. /etc/crane/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    let spec = &config.spec;
    println!("{}", "Database:".bold());
    match &spec.database.url {
        Some(_) => println!("  PostgreSQL (max {} connections)", spec.database.max_connections),
        None => println!("  {}", "in-memory".yellow()),
    }
    println!();

    println!("{}", "Runtime:".bold());
    println!(
        "  Docker socket: {}",
        spec.runtime.docker_socket_path.as_deref().unwrap_or("(default)")
    );
    println!("  Compose dir: {}", spec.runtime.compose_dir.display());
    println!("  Compose binary: {}", spec.runtime.compose_binary);
    println!();

    println!("{}", "Routing:".bold());
    println!("  Network: {}", spec.routing.network);
    if spec.routing.proxy_enabled {
        println!(
            "  Proxy: {} ({}, metrics :{})",
            spec.routing.proxy.service, spec.routing.proxy.image, spec.routing.proxy.metrics_port
        );
    } else {
        println!("  Proxy: {}", "disabled".yellow());
    }
    println!();

    println!("{}", "Monitoring:".bold());
    println!("  Scrape dir: {}", spec.monitoring.scrape_dir.display());
    println!(
        "  Reload: {}",
        if spec.monitoring.enabled {
            format!("restart compose project '{}'", spec.monitoring.compose_project)
        } else {
            "disabled".to_string()
        }
    );
    println!();

    println!("{}", "Policy:".bold());
    println!("  OPA: {}", spec.policy.opa_url);
    println!("  Policy name: {}", spec.policy.policy_name);
    match &spec.policy.output_dir {
        Some(dir) => println!("  Output dir: {}", dir.display()),
        None => println!("  Output dir: {}", "(not set, required)".red()),
    }
    if let Some(seed) = &spec.policy.seed_file {
        println!("  Seed file: {}", seed.display());
    }
    println!();

    Ok(())
}

fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = CraneConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

fn generate(output: PathBuf, policy_dir: PathBuf) -> Result<()> {
    let mut sample = CraneConfigManifest::default();
    sample.spec.policy.output_dir = Some(policy_dir);

    sample
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());

    Ok(())
}
