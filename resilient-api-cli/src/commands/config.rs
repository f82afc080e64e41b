//! Configuration commands

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use colored::Colorize;

use crate::config::CliConfig;
use crate::context::Context;

/// Configuration management commands
#[derive(Debug, Args)]
pub struct ConfigCommands {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration
    Show,

    /// Set a configuration value
    Set {
        /// Configuration key (e.g. settings.timeout_secs, api_url, header.X-Tenant)
        key: String,

        /// Value to set
        value: String,
    },

    /// Get a configuration value
    Get {
        /// Configuration key
        key: String,
    },

    /// List all profiles
    Profiles,

    /// Set the default profile
    UseProfile {
        /// Profile name to use as default
        name: String,
    },

    /// Delete a profile and its stored tokens
    DeleteProfile {
        /// Profile name to delete
        name: String,

        /// Force deletion without confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Show the configuration file path
    Path,
}

/// Execute configuration commands
pub async fn execute(ctx: &Context, cmd: ConfigCommands) -> Result<()> {
    match cmd.command {
        ConfigSubcommand::Show => show(ctx),
        ConfigSubcommand::Set { key, value } => set(ctx, &key, &value),
        ConfigSubcommand::Get { key } => get(ctx, &key),
        ConfigSubcommand::Profiles => list_profiles(ctx),
        ConfigSubcommand::UseProfile { name } => use_profile(ctx, &name),
        ConfigSubcommand::DeleteProfile { name, force } => delete_profile(ctx, &name, force).await,
        ConfigSubcommand::Path => show_path(),
    }
}

fn show(ctx: &Context) -> Result<()> {
    let settings = &ctx.config.settings;

    crate::output::print_section("Settings");
    crate::output::print_field("output_format", &settings.output_format);
    crate::output::print_field("color", &settings.color.to_string());
    crate::output::print_field("timeout_secs", &settings.timeout_secs.to_string());
    crate::output::print_field("max_retries", &settings.max_retries.to_string());
    crate::output::print_field("cache_ttl_secs", &settings.cache_ttl_secs.to_string());

    crate::output::print_section(&format!("Profile [{}]", ctx.profile_name));
    crate::output::print_field("api_url", ctx.api_url());
    let mut headers: Vec<_> = ctx.profile.headers.iter().collect();
    headers.sort();
    for (name, value) in headers {
        crate::output::print_field(&format!("header.{}", name), value);
    }

    Ok(())
}

fn set(ctx: &Context, key: &str, value: &str) -> Result<()> {
    let mut config = ctx.config.clone();
    config.set_value(key, value, &ctx.profile_name)?;
    config.save().context("Failed to save configuration")?;

    ctx.output.success(&format!("Set {} = {}", key, value));
    Ok(())
}

fn get(ctx: &Context, key: &str) -> Result<()> {
    let value = ctx
        .config
        .get_value(key, Some(&ctx.profile_name))
        .with_context(|| format!("No value for '{}'", key))?;
    println!("{}", value);
    Ok(())
}

fn list_profiles(ctx: &Context) -> Result<()> {
    if ctx.config.profiles.is_empty() {
        ctx.output
            .info("No profiles configured. Run 'rapi auth login' to create one.");
        return Ok(());
    }

    println!("{}", "Configured profiles:".bold());
    println!();

    for name in ctx.config.list_profiles() {
        if ctx.config.default_profile.as_deref() == Some(name) {
            println!("  {} {}", "→".green(), name.green().bold());
        } else {
            println!("    {}", name);
        }
    }

    Ok(())
}

fn use_profile(ctx: &Context, name: &str) -> Result<()> {
    let mut config = ctx.config.clone();

    if !config.profiles.contains_key(name) {
        anyhow::bail!(
            "Profile '{}' not found. Run 'rapi config profiles' to list available profiles.",
            name
        );
    }

    config.set_default_profile(name);
    config.save().context("Failed to save configuration")?;

    ctx.output.success(&format!("Now using profile '{}'", name));
    Ok(())
}

async fn delete_profile(ctx: &Context, name: &str, force: bool) -> Result<()> {
    use resilient_api_sdk::CredentialStore;

    let mut config = ctx.config.clone();

    if !config.profiles.contains_key(name) {
        anyhow::bail!("Profile '{}' not found", name);
    }

    if !force {
        let confirm = dialoguer::Confirm::new()
            .with_prompt(format!("Delete profile '{}'?", name))
            .default(false)
            .interact()
            .context("Failed to get confirmation")?;

        if !confirm {
            ctx.output.info("Cancelled");
            return Ok(());
        }
    }

    config.profiles.remove(name);
    if config.default_profile.as_deref() == Some(name) {
        config.default_profile = None;
    }
    config.save().context("Failed to save configuration")?;

    crate::credentials::KeyringCredentialStore::new(name)
        .clear()
        .await
        .context("Failed to clear stored tokens")?;

    ctx.output.success(&format!("Deleted profile '{}'", name));
    Ok(())
}

fn show_path() -> Result<()> {
    let path = CliConfig::config_path()?;
    let status = if path.exists() { "✓".green() } else { "✗".red() };
    println!("{} {}", status, path.display());
    Ok(())
}
