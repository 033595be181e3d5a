// Copyright (c) 2026 Crane Contributors
// SPDX-License-Identifier: AGPL-3.0

//! RBAC policy commands
//!
//! Commands: publish, push-file, seed, check

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use crane_core::domain::crane_config::CraneConfigManifest;
use crane_core::domain::policy::AuthorizationInput;
use crane_core::domain::rule_set::RuleSetDocument;

use crate::wiring::Services;

#[derive(Subcommand)]
pub enum PolicyCommand {
    /// Generate a rule-set from the store and publish it (replaces the active policy)
    Publish,

    /// Publish an existing rule-set file
    PushFile {
        /// Rule-set file (default: spec.policy.seed_file)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,

        /// Refuse to replace an existing policy of the same name
        #[arg(long)]
        no_force: bool,
    },

    /// Replace all roles and permissions with the contents of a rule-set file
    Seed {
        /// Rule-set file (default: spec.policy.seed_file)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,

        /// Parse and print the mapping without touching the store
        #[arg(long)]
        dry_run: bool,
    },

    /// Ask the decision service for a verdict
    Check {
        /// Role of the caller (repeatable)
        #[arg(long = "role", required = true)]
        roles: Vec<String>,

        #[arg(long)]
        action: String,

        #[arg(long)]
        object: String,
    },
}

pub async fn handle_command(command: PolicyCommand, config: CraneConfigManifest) -> Result<()> {
    let seed_file = config.spec.policy.seed_file.clone();
    let rule_file = |file: Option<PathBuf>| {
        file.or_else(|| seed_file.clone())
            .context("No rule-set file given and spec.policy.seed_file is not set")
    };

    if let PolicyCommand::Seed { file, dry_run: true } = command {
        return print_mapping(rule_file(file)?);
    }

    let services = Services::new(config).await?;
    let synthesizer = services.policy_synthesizer()?;

    match command {
        PolicyCommand::Publish => {
            let receipt = synthesizer
                .publish_from_store()
                .await
                .context("Failed to publish policy")?;
            println!(
                "{}",
                format!("✓ Policy '{}' published (HTTP {})", receipt.policy_name, receipt.push.status).green()
            );
            println!("  Rule-set: {}", receipt.path.display());
        }
        PolicyCommand::PushFile { file, no_force } => {
            let path = rule_file(file)?;
            let receipt = synthesizer
                .publish_file(&path, !no_force)
                .await
                .with_context(|| format!("Failed to push {:?}", path))?;
            println!(
                "{}",
                format!("✓ Policy '{}' published from {}", receipt.policy_name, path.display()).green()
            );
        }
        PolicyCommand::Seed { file, .. } => {
            let path = rule_file(file)?;
            let summary = synthesizer
                .seed_store_from_file(&path)
                .await
                .with_context(|| format!("Failed to seed store from {:?}", path))?;
            println!("{}", "✓ Store seeded".green());
            println!(
                "  Removed: {} role(s), {} permission(s), {} link(s)",
                summary.removed_roles, summary.removed_permissions, summary.removed_links
            );
            println!(
                "  Created: {} role(s), {} permission(s), {} link(s)",
                summary.roles_created, summary.permissions_created, summary.links_created
            );
        }
        PolicyCommand::Check { roles, action, object } => {
            let input = AuthorizationInput { roles, action, object };
            let allowed = synthesizer.check(&input).await.context("Policy query failed")?;
            if allowed {
                println!("{}", "allow".green().bold());
            } else {
                println!("{}", "deny".red().bold());
            }
        }
    }

    Ok(())
}

fn print_mapping(path: PathBuf) -> Result<()> {
    let document = RuleSetDocument::from_file(&path).with_context(|| format!("Failed to parse {:?}", path))?;
    println!("{} {}", "package".bold(), document.package);
    for entry in &document.entries {
        println!("{}", entry.role.bold());
        for grant in &entry.grants {
            match &grant.description {
                Some(description) => println!("  {} {}  {}", grant.action, grant.object, description.dimmed()),
                None => println!("  {} {}", grant.action, grant.object),
            }
        }
    }
    Ok(())
}
