//! Authentication commands

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};
use dialoguer::{Input, Password};
use resilient_api_sdk::{CredentialStore, TokenPair};

use crate::context::Context;

/// Token management commands
#[derive(Debug, Args)]
pub struct AuthCommands {
    #[command(subcommand)]
    pub command: AuthSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum AuthSubcommand {
    /// Store an access/refresh token pair in the system keyring
    Login {
        /// Access token (prompted when omitted)
        #[arg(long)]
        access_token: Option<String>,

        /// Refresh token (prompted when omitted)
        #[arg(long)]
        refresh_token: Option<String>,
    },

    /// Remove the stored tokens
    Logout {
        /// Clear every configured profile
        #[arg(long)]
        all: bool,
    },

    /// Show which tokens are stored for the profile
    Status,

    /// Exchange the refresh token for a new pair now
    Refresh,
}

/// Execute authentication commands
pub async fn execute(ctx: &Context, cmd: AuthCommands) -> Result<()> {
    match cmd.command {
        AuthSubcommand::Login {
            access_token,
            refresh_token,
        } => login(ctx, access_token, refresh_token).await,
        AuthSubcommand::Logout { all } => logout(ctx, all).await,
        AuthSubcommand::Status => status(ctx).await,
        AuthSubcommand::Refresh => refresh(ctx).await,
    }
}

async fn login(ctx: &Context, access_token: Option<String>, refresh_token: Option<String>) -> Result<()> {
    let profile_name = ctx.profile_name.as_str();
    ctx.output
        .info(&format!("Storing tokens for profile: {}", profile_name));

    let access_token = match access_token {
        Some(token) => token,
        None => Password::new()
            .with_prompt("Access token")
            .interact()
            .context("Failed to read access token")?,
    };
    let refresh_token = match refresh_token {
        Some(token) => token,
        None => Password::new()
            .with_prompt("Refresh token")
            .interact()
            .context("Failed to read refresh token")?,
    };

    ctx.credentials()
        .store(TokenPair::new(access_token, refresh_token))
        .await
        .context("Failed to store tokens")?;
    ctx.output.success("Tokens stored in system keyring");

    let mut config = ctx.config.clone();
    let current_url = ctx.api_url().to_string();
    let api_url: String = Input::new()
        .with_prompt("API URL")
        .default(current_url)
        .interact_text()
        .context("Failed to read API URL")?;
    config.set_value("api_url", &api_url, profile_name)?;

    if config.default_profile.is_none() {
        config.set_default_profile(profile_name);
        ctx.output
            .info(&format!("Set '{}' as default profile", profile_name));
    }

    config.save().context("Failed to save configuration")?;
    ctx.output
        .success(&format!("Successfully configured profile '{}'", profile_name));
    Ok(())
}

async fn logout(ctx: &Context, all: bool) -> Result<()> {
    if all {
        for profile_name in ctx.config.list_profiles() {
            crate::credentials::KeyringCredentialStore::new(profile_name)
                .clear()
                .await
                .with_context(|| format!("Failed to clear tokens for '{}'", profile_name))?;
        }
        ctx.output.success("Logged out from all profiles");
        return Ok(());
    }

    ctx.credentials()
        .clear()
        .await
        .context("Failed to clear tokens")?;
    ctx.output
        .success(&format!("Logged out from profile '{}'", ctx.profile_name));
    Ok(())
}

async fn status(ctx: &Context) -> Result<()> {
    let credentials = ctx.credentials();
    let has_access = credentials.access_token().await?.is_some();
    let has_refresh = credentials.refresh_token().await?.is_some();

    crate::output::print_section("Authentication");
    crate::output::print_field("Profile", &ctx.profile_name);
    crate::output::print_field("API URL", ctx.api_url());
    crate::output::print_field("Access token", presence(has_access));
    crate::output::print_field("Refresh token", presence(has_refresh));
    if ctx.config.default_profile.as_deref() == Some(ctx.profile_name.as_str()) {
        crate::output::print_field("Default", "yes");
    }

    if !has_access && !has_refresh {
        ctx.output.info("Run 'rapi auth login' to store tokens.");
    }
    Ok(())
}

async fn refresh(ctx: &Context) -> Result<()> {
    let client = ctx.create_client()?;
    let spinner = ctx.output.spinner("Refreshing session...");
    let result = client.refresh_session().await;
    spinner.finish_and_clear();

    result.context("Refresh failed")?;
    ctx.output.success("Session refreshed");
    Ok(())
}

fn presence(present: bool) -> &'static str {
    if present {
        "stored"
    } else {
        "missing"
    }
}
