//! CLI execution context

use anyhow::{Context as _, Result};
use resilient_api_sdk::{ResilientClient, SdkConfig};
use std::sync::Arc;
use std::time::Duration;

use crate::cli::Cli;
use crate::config::{CliConfig, Profile};
use crate::credentials::KeyringCredentialStore;
use crate::output::OutputWriter;
use crate::prompt::ConsolePolicyPrompt;

/// Execution context for CLI commands
pub struct Context {
    /// CLI configuration
    pub config: CliConfig,

    /// Active profile name
    pub profile_name: String,

    /// Active profile
    pub profile: Profile,

    /// Output writer
    pub output: OutputWriter,

    /// Verbose mode
    pub verbose: bool,

    /// API URL override
    pub api_url_override: Option<String>,
}

impl Context {
    /// Create a new context from CLI arguments
    pub fn new(cli: &Cli) -> Result<Self> {
        let config = CliConfig::load().unwrap_or_default();

        let profile_name = cli
            .profile
            .clone()
            .or_else(|| config.default_profile.clone())
            .unwrap_or_else(|| "default".to_string());
        let profile = config.profiles.get(&profile_name).cloned().unwrap_or_default();

        let output_format = match cli.output {
            Some(format) => format,
            None => config.settings.output_format.parse().unwrap_or_default(),
        };
        let no_color = cli.no_color || !config.settings.color;

        Ok(Self {
            output: OutputWriter::new(output_format, no_color),
            config,
            profile_name,
            profile,
            verbose: cli.verbose,
            api_url_override: cli.api_url.clone(),
        })
    }

    /// Get the effective API URL
    pub fn api_url(&self) -> &str {
        self.api_url_override
            .as_deref()
            .unwrap_or_else(|| self.profile.api_url())
    }

    pub fn credentials(&self) -> KeyringCredentialStore {
        KeyringCredentialStore::new(&self.profile_name)
    }

    /// SDK configuration: files and `RESILIENT_API_*` variables first, then
    /// the profile and global CLI settings on top.
    pub fn sdk_config(&self) -> Result<SdkConfig> {
        let mut config = SdkConfig::load().unwrap_or_else(|e| {
            tracing::debug!(error = %e, "Falling back to default SDK configuration");
            SdkConfig::default()
        });

        config.base_url = self.api_url().to_string();
        config.timeout = Duration::from_secs(self.config.settings.timeout_secs);
        config.retry.max_retries = self.config.settings.max_retries;
        config.cache_ttl = Duration::from_secs(self.config.settings.cache_ttl_secs);
        config.enable_logging = config.enable_logging || self.verbose;

        for (name, value) in &self.profile.headers {
            config = config.with_header(name.clone(), value.clone());
        }

        config.validate().context("Invalid client configuration")?;
        Ok(config)
    }

    /// Create an SDK client bound to this profile's keyring entries
    pub fn create_client(&self) -> Result<ResilientClient> {
        let client = ResilientClient::new(self.sdk_config()?, Arc::new(self.credentials()))
            .context("Failed to create API client")?;
        client.subscribe_policy(ConsolePolicyPrompt);
        Ok(client)
    }
}
