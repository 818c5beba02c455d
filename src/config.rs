//! Configuration management for Threadline
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{Result, ThreadlineError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure for Threadline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Chat backend connection settings
    #[serde(default)]
    pub backend: BackendConfig,
    /// Model picker settings
    #[serde(default)]
    pub models: ModelsConfig,
    /// Thread and composer defaults
    #[serde(default)]
    pub chat: ChatConfig,
    /// Session persistence settings
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Chat backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// URL the conversation is POSTed to
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Bound on connection establishment; reading the reply is unbounded
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

fn default_endpoint() -> String {
    "http://localhost:3000/api/chat".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

/// Models offered by the model picker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    /// Model selected when none has been persisted
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_model_options")]
    pub options: Vec<String>,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_model_options() -> Vec<String> {
    vec![
        "gpt-4o-mini".to_string(),
        "gpt-4o".to_string(),
        "claude-3-5-sonnet".to_string(),
    ]
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            options: default_model_options(),
        }
    }
}

/// Thread titles and composer defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Title of freshly created threads
    #[serde(default = "default_thread_title")]
    pub default_thread_title: String,
    /// Characters of the first message used as a thread title
    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,
    /// Characters of the branching message used in a branch title
    #[serde(default = "default_branch_title_chars")]
    pub branch_title_chars: usize,
    /// Tools selected at startup
    #[serde(default)]
    pub default_tools: Vec<String>,
}

fn default_thread_title() -> String {
    "New Chat".to_string()
}

fn default_title_max_chars() -> usize {
    40
}

fn default_branch_title_chars() -> usize {
    30
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_thread_title: default_thread_title(),
            title_max_chars: default_title_max_chars(),
            branch_title_chars: default_branch_title_chars(),
            default_tools: Vec::new(),
        }
    }
}

/// Key-value backend used for session persistence
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Embedded sled database
    #[default]
    Sled,
    /// Single-table SQLite database
    Sqlite,
    /// Process memory only; nothing survives exit
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = ThreadlineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sled" => Ok(Self::Sled),
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(ThreadlineError::Config(format!(
                "Invalid storage backend: {}. Must be one of: sled, sqlite, memory",
                other
            ))),
        }
    }
}

/// Session persistence configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    /// Database location; defaults to the platform data directory
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ThreadlineError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ThreadlineError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(endpoint) = std::env::var("THREADLINE_ENDPOINT") {
            self.backend.endpoint = endpoint;
        }

        if let Ok(model) = std::env::var("THREADLINE_MODEL") {
            if !self.models.options.contains(&model) {
                self.models.options.push(model.clone());
            }
            self.models.default_model = model;
        }

        if let Ok(backend) = std::env::var("THREADLINE_STORAGE_BACKEND") {
            match backend.parse() {
                Ok(value) => self.storage.backend = value,
                Err(e) => tracing::warn!("Ignoring THREADLINE_STORAGE_BACKEND: {}", e),
            }
        }

        if let Ok(path) = std::env::var("THREADLINE_STORAGE_PATH") {
            self.storage.path = Some(PathBuf::from(path));
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(endpoint) = &cli.endpoint {
            tracing::debug!("Using endpoint override: {}", endpoint);
            self.backend.endpoint = endpoint.clone();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        let endpoint = url::Url::parse(&self.backend.endpoint).map_err(|e| {
            ThreadlineError::Config(format!(
                "Invalid backend endpoint {}: {}",
                self.backend.endpoint, e
            ))
        })?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(ThreadlineError::Config(format!(
                "Backend endpoint must use http or https, got {}",
                endpoint.scheme()
            ))
            .into());
        }

        if self.backend.connect_timeout_seconds == 0 {
            return Err(ThreadlineError::Config(
                "backend.connect_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.models.options.is_empty() {
            return Err(
                ThreadlineError::Config("models.options cannot be empty".to_string()).into(),
            );
        }

        if !self.models.options.contains(&self.models.default_model) {
            return Err(ThreadlineError::Config(format!(
                "Default model {} is not one of: {}",
                self.models.default_model,
                self.models.options.join(", ")
            ))
            .into());
        }

        if self.chat.title_max_chars == 0 {
            return Err(ThreadlineError::Config(
                "chat.title_max_chars must be greater than 0".to_string(),
            )
            .into());
        }

        if self.chat.branch_title_chars == 0 {
            return Err(ThreadlineError::Config(
                "chat.branch_title_chars must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
