//! CLI configuration management

use anyhow::{bail, Context as _, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Default API URL
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// CLI configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CliConfig {
    /// Default profile to use
    #[serde(default)]
    pub default_profile: Option<String>,

    /// Named profiles
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,

    /// Global settings
    #[serde(default)]
    pub settings: Settings,
}

impl CliConfig {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config from {:?}", path))
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).with_context(|| format!("Failed to write config to {:?}", path))
    }

    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("com", "resilient-api", "rapi")
            .context("Could not determine config directory")?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get a profile by name, falling back to the default profile
    pub fn get_profile(&self, name: Option<&str>) -> Option<&Profile> {
        let profile_name = name.or(self.default_profile.as_deref())?;
        self.profiles.get(profile_name)
    }

    pub fn get_or_create_profile(&mut self, name: &str) -> &mut Profile {
        self.profiles.entry(name.to_string()).or_default()
    }

    pub fn set_default_profile(&mut self, name: &str) {
        self.default_profile = Some(name.to_string());
    }

    pub fn list_profiles(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Set a value by key. `settings.*` keys are global; `api_url` and
    /// `header.<name>` apply to `profile`.
    pub fn set_value(&mut self, key: &str, value: &str, profile: &str) -> Result<()> {
        match key {
            "settings.output_format" => {
                if !matches!(value, "json" | "compact") {
                    bail!("output_format must be 'json' or 'compact'");
                }
                self.settings.output_format = value.to_string();
            }
            "settings.color" => self.settings.color = parse(key, value)?,
            "settings.timeout_secs" => self.settings.timeout_secs = parse(key, value)?,
            "settings.max_retries" => self.settings.max_retries = parse(key, value)?,
            "settings.cache_ttl_secs" => self.settings.cache_ttl_secs = parse(key, value)?,
            "api_url" => {
                url::Url::parse(value).with_context(|| format!("Invalid URL: {}", value))?;
                self.get_or_create_profile(profile).api_url = Some(value.to_string());
            }
            _ => match key.strip_prefix("header.") {
                Some(name) if !name.is_empty() => {
                    self.get_or_create_profile(profile)
                        .headers
                        .insert(name.to_string(), value.to_string());
                }
                _ => bail!("Unknown configuration key: {}", key),
            },
        }
        Ok(())
    }

    pub fn get_value(&self, key: &str, profile: Option<&str>) -> Option<String> {
        let profile = self.get_profile(profile);
        match key {
            "settings.output_format" => Some(self.settings.output_format.clone()),
            "settings.color" => Some(self.settings.color.to_string()),
            "settings.timeout_secs" => Some(self.settings.timeout_secs.to_string()),
            "settings.max_retries" => Some(self.settings.max_retries.to_string()),
            "settings.cache_ttl_secs" => Some(self.settings.cache_ttl_secs.to_string()),
            "api_url" => Some(profile.map_or(DEFAULT_API_URL, Profile::api_url).to_string()),
            _ => {
                let name = key.strip_prefix("header.")?;
                profile?.headers.get(name).cloned()
            }
        }
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid value '{}' for {}", value, key))
}

/// A configuration profile
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Profile {
    /// API base URL
    #[serde(default)]
    pub api_url: Option<String>,

    /// Additional headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Profile {
    /// Get the API URL, falling back to default
    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }
}

/// Global settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// `json` (pretty) or `compact`
    #[serde(default = "default_output_format")]
    pub output_format: String,

    /// Enable colored output
    #[serde(default = "default_true")]
    pub color: bool,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Maximum retries for transient failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Lifetime of cached GET responses
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_format: default_output_format(),
            color: true,
            timeout_secs: default_timeout(),
            max_retries: default_max_retries(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_output_format() -> String {
    "json".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    2
}

fn default_cache_ttl() -> u64 {
    30
}
