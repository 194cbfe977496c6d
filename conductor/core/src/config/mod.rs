//! TOML Configuration File Support
//!
//! Centralized configuration loading, supporting a TOML configuration file at
//! `~/.config/stream-conductor/conductor.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! host = "localhost"
//! port = 11434
//! model = "llama3.2"
//! request_timeout_secs = 300
//!
//! [generation]
//! max_tokens = 8192
//! max_continuations = 2
//!
//! [parser]
//! reset_on_idle = false
//!
//! [server]
//! bind = "127.0.0.1:5173"
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default per-call output token budget
pub const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Default number of continuation calls allowed after the first call
///
/// A response may therefore take up to `DEFAULT_MAX_CONTINUATIONS + 1`
/// model calls.
pub const DEFAULT_MAX_CONTINUATIONS: u32 = 2;

/// Default instructions telling the model how to emit artifacts
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert software engineer.
When you create or change files or need commands run, wrap them in a single artifact:

<artifact id="kebab-case-id" title="Short title">
  <action type="file" path="relative/path">full file contents</action>
  <action type="shell">command to run</action>
</artifact>

Always write complete file contents. Order actions so that files exist before commands use them."#;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Backend section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// Ollama host
    pub host: Option<String>,
    /// Ollama port
    pub port: Option<u16>,
    /// Model to request
    pub model: Option<String>,
    /// Whole-request timeout in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Generation section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationToml {
    /// Output token budget per model call
    pub max_tokens: Option<u32>,
    /// Maximum continuation switches per response
    pub max_continuations: Option<u32>,
    /// System prompt sent with every call
    pub system_prompt: Option<String>,
}

/// Parser section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserToml {
    /// Reset and re-parse on idle (development reloads)
    pub reset_on_idle: Option<bool>,
}

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// HTTP listen address
    pub bind: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorToml {
    /// Backend configuration section
    pub backend: BackendToml,
    /// Generation configuration section
    pub generation: GenerationToml,
    /// Parser configuration section
    pub parser: ParserToml,
    /// Server configuration section
    pub server: ServerToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved backend settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendSettings {
    /// Ollama host
    pub host: String,
    /// Ollama port
    pub port: u16,
    /// Model to request
    pub model: String,
    /// Whole-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11434,
            model: "llama3.2".to_string(),
            request_timeout_secs: 300,
        }
    }
}

/// Resolved generation settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationSettings {
    /// Output token budget per model call
    pub max_tokens: u32,
    /// Maximum continuation switches per response
    pub max_continuations: u32,
    /// System prompt sent with every call
    pub system_prompt: String,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            max_continuations: DEFAULT_MAX_CONTINUATIONS,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Centralized configuration
///
/// Consolidates configuration from multiple sources and tracks where the
/// winning values came from. Use [`load_config`] to load it with proper
/// priority handling.
#[derive(Clone, Debug)]
pub struct ConductorConfig {
    /// Backend connection
    pub backend: BackendSettings,
    /// Generation limits
    pub generation: GenerationSettings,
    /// Reset and re-parse every assistant message on idle
    pub parser_reset_on_idle: bool,
    /// HTTP listen address
    pub bind: String,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            backend: BackendSettings::default(),
            generation: GenerationSettings::default(),
            parser_reset_on_idle: false,
            bind: "127.0.0.1:5173".to_string(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ConductorConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check values that would make the conductor unusable
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "generation.max_tokens must be greater than 0".to_string(),
            ));
        }
        if self.backend.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "backend.model must not be empty".to_string(),
            ));
        }
        if self.backend.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "backend.request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/stream-conductor/conductor.toml` or
/// `~/.config/stream-conductor/conductor.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("stream-conductor").join("conductor.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if the
/// resulting configuration is invalid. A missing config file is not an error.
pub fn load_config() -> Result<ConductorConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed, or
/// if the resulting configuration is invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ConductorConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration, reading environment variables through `env`
pub(crate) fn load_config_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ConductorConfig, ConfigError> {
    let mut config = ConductorConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ConductorToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env);
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ConductorConfig, toml: &ConductorToml) {
    // Backend settings
    if let Some(ref host) = toml.backend.host {
        config.backend.host.clone_from(host);
    }
    if let Some(port) = toml.backend.port {
        config.backend.port = port;
    }
    if let Some(ref model) = toml.backend.model {
        config.backend.model.clone_from(model);
    }
    if let Some(secs) = toml.backend.request_timeout_secs {
        config.backend.request_timeout_secs = secs;
    }

    // Generation settings
    if let Some(max_tokens) = toml.generation.max_tokens {
        config.generation.max_tokens = max_tokens;
    }
    if let Some(continuations) = toml.generation.max_continuations {
        config.generation.max_continuations = continuations;
    }
    if let Some(ref prompt) = toml.generation.system_prompt {
        config.generation.system_prompt.clone_from(prompt);
    }

    // Parser settings
    if let Some(reset) = toml.parser.reset_on_idle {
        config.parser_reset_on_idle = reset;
    }

    // Server settings
    if let Some(ref bind) = toml.server.bind {
        config.bind.clone_from(bind);
    }
}

fn parse_flag(value: &str) -> bool {
    value != "0" && !value.eq_ignore_ascii_case("false")
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut ConductorConfig, env: impl Fn(&str) -> Option<String>) {
    if let Some(host) = env("OLLAMA_HOST") {
        config.backend.host = host;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = env("OLLAMA_PORT").and_then(|p| p.parse::<u16>().ok()) {
        config.backend.port = port;
        config.source = ConfigSource::Env;
    }
    if let Some(model) = env("CONDUCTOR_MODEL") {
        config.backend.model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(max_tokens) = env("CONDUCTOR_MAX_TOKENS").and_then(|v| v.parse::<u32>().ok()) {
        config.generation.max_tokens = max_tokens;
        config.source = ConfigSource::Env;
    }
    if let Some(continuations) =
        env("CONDUCTOR_MAX_CONTINUATIONS").and_then(|v| v.parse::<u32>().ok())
    {
        config.generation.max_continuations = continuations;
        config.source = ConfigSource::Env;
    }
    if let Some(reset) = env("CONDUCTOR_PARSER_RESET") {
        config.parser_reset_on_idle = parse_flag(&reset);
        config.source = ConfigSource::Env;
    }
    if let Some(bind) = env("CONDUCTOR_BIND") {
        config.bind = bind;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Listen address override
    pub bind: Option<String>,
    /// Model override
    pub model: Option<String>,
    /// Per-call token budget override
    pub max_tokens: Option<u32>,
    /// Continuation switch budget override
    pub max_continuations: Option<u32>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listen address override
    #[must_use]
    pub fn with_bind(mut self, bind: String) -> Self {
        self.bind = Some(bind);
        self
    }

    /// Set model override
    #[must_use]
    pub fn with_model(mut self, model: String) -> Self {
        self.model = Some(model);
        self
    }

    /// Set token budget override
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set switch budget override
    #[must_use]
    pub fn with_max_continuations(mut self, continuations: u32) -> Self {
        self.max_continuations = Some(continuations);
        self
    }

    /// Apply overrides to a configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the overridden configuration is invalid.
    pub fn apply(&self, config: &mut ConductorConfig) -> Result<(), ConfigError> {
        if self.bind.is_some()
            || self.model.is_some()
            || self.max_tokens.is_some()
            || self.max_continuations.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref bind) = self.bind {
            config.bind.clone_from(bind);
        }
        if let Some(ref model) = self.model {
            config.backend.model.clone_from(model);
        }
        if let Some(max_tokens) = self.max_tokens {
            config.generation.max_tokens = max_tokens;
        }
        if let Some(continuations) = self.max_continuations {
            config.generation.max_continuations = continuations;
        }

        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================
