//! TOML Configuration File Support
//!
//! Centralized configuration loading for the bridge, supporting a TOML file
//! at `~/.config/serving-bridge/bridge.toml`.
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
//! [endpoint]
//! host = "https://workspace.example.com"
//! name = "agent-endpoint"
//! auth_mode = "auto"
//!
//! [history]
//! max_turns = 10
//! max_chars = 100000
//!
//! [stream]
//! connect_timeout_ms = 10000
//! idle_timeout_ms = 60000
//! channel_capacity = 100
//!
//! [credentials]
//! db_instance = "chat-history"
//! refresh_margin_secs = 300
//! request_timeout_secs = 30
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::history::HistoryLimits;
use crate::session::EndpointIdentity;
use crate::transport::config::{AuthModeSetting, StreamSettings};

/// Longest refresh margin accepted
const MAX_REFRESH_MARGIN: Duration = Duration::from_secs(24 * 60 * 60);

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

/// Endpoint section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointToml {
    /// Workspace base URL
    pub host: Option<String>,

    /// Serving endpoint name
    pub name: Option<String>,

    /// `obo`, `pat` or `auto`
    pub auth_mode: Option<AuthModeSetting>,
}

/// History section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryToml {
    /// Turns kept in the window
    pub max_turns: Option<usize>,

    /// Character budget of the window
    pub max_chars: Option<usize>,
}

/// Stream section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamToml {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,

    /// Idle-read timeout in milliseconds
    pub idle_timeout_ms: Option<u64>,

    /// Frames buffered between producer and consumer
    pub channel_capacity: Option<usize>,
}

/// Credentials section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsToml {
    /// Database instance the credentials are minted for
    pub db_instance: Option<String>,

    /// Refresh when less than this many seconds of validity remain
    pub refresh_margin_secs: Option<u64>,

    /// Timeout of a single mint request in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeToml {
    /// Endpoint configuration section
    pub endpoint: EndpointToml,

    /// History configuration section
    pub history: HistoryToml,

    /// Stream configuration section
    pub stream: StreamToml,

    /// Credentials configuration section
    pub credentials: CredentialsToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Centralized configuration for the bridge
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Which auth scheme new sessions use
    pub auth_mode: AuthModeSetting,

    /// Workspace base URL
    pub host: Option<String>,

    /// Serving endpoint name
    pub endpoint_name: Option<String>,

    /// History window limits
    pub history: HistoryLimits,

    /// Stream tuning
    pub stream: StreamSettings,

    /// Credential refresh safety margin
    pub refresh_margin: Duration,

    /// Database instance for credential leases
    pub db_instance: Option<String>,

    /// Timeout of a credential mint request
    pub credential_request_timeout: Duration,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            auth_mode: AuthModeSetting::default(),
            host: None,
            endpoint_name: None,
            history: HistoryLimits::default(),
            stream: StreamSettings::default(),
            refresh_margin: Duration::from_secs(300),
            db_instance: None,
            credential_request_timeout: Duration::from_secs(30),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl BridgeConfig {
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

    /// The configured serving endpoint
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] if the host or endpoint name
    /// is not configured.
    pub fn endpoint(&self) -> Result<EndpointIdentity, ConfigError> {
        let host = non_blank(self.host.as_deref()).ok_or_else(|| {
            ConfigError::ValidationError("endpoint host is not configured".to_string())
        })?;
        let name = non_blank(self.endpoint_name.as_deref()).ok_or_else(|| {
            ConfigError::ValidationError("endpoint name is not configured".to_string())
        })?;
        Ok(EndpointIdentity::new(host, name))
    }

    /// Check value ranges
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history.max_turns == 0 {
            return Err(ConfigError::ValidationError(
                "max_turns must be at least 1".to_string(),
            ));
        }
        if self.history.max_chars == 0 {
            return Err(ConfigError::ValidationError(
                "max_chars must be at least 1".to_string(),
            ));
        }
        if self.stream.idle_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "idle_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.stream.channel_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.refresh_margin > MAX_REFRESH_MARGIN {
            return Err(ConfigError::ValidationError(format!(
                "refresh margin of {}s exceeds the {}s ceiling",
                self.refresh_margin.as_secs(),
                MAX_REFRESH_MARGIN.as_secs()
            )));
        }
        if let Some(host) = non_blank(self.host.as_deref()) {
            if !host.starts_with("http://") && !host.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "endpoint host '{host}' must start with http:// or https://"
                )));
            }
        }
        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/serving-bridge/bridge.toml` or
/// `~/.config/serving-bridge/bridge.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("serving-bridge").join("bridge.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resulting values are invalid. A missing config file is not an error.
pub fn load_config() -> Result<BridgeConfig, ConfigError> {
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
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the resulting values are invalid.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<BridgeConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration, reading environment variables through `env`
fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<BridgeConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = BridgeConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: BridgeToml = toml::from_str(&toml_content)?;
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
fn apply_toml_config(config: &mut BridgeConfig, toml: &BridgeToml) {
    // Endpoint settings
    if toml.endpoint.host.is_some() {
        config.host = toml.endpoint.host.clone();
    }
    if toml.endpoint.name.is_some() {
        config.endpoint_name = toml.endpoint.name.clone();
    }
    if let Some(mode) = toml.endpoint.auth_mode {
        config.auth_mode = mode;
    }

    // History settings
    if let Some(turns) = toml.history.max_turns {
        config.history.max_turns = turns;
    }
    if let Some(chars) = toml.history.max_chars {
        config.history.max_chars = chars;
    }

    // Stream settings
    if let Some(timeout) = toml.stream.connect_timeout_ms {
        config.stream.connect_timeout_ms = timeout;
    }
    if let Some(timeout) = toml.stream.idle_timeout_ms {
        config.stream.idle_timeout_ms = timeout;
    }
    if let Some(capacity) = toml.stream.channel_capacity {
        config.stream.channel_capacity = capacity;
    }

    // Credential settings
    if toml.credentials.db_instance.is_some() {
        config.db_instance = toml.credentials.db_instance.clone();
    }
    if let Some(margin) = toml.credentials.refresh_margin_secs {
        config.refresh_margin = Duration::from_secs(margin);
    }
    if let Some(timeout) = toml.credentials.request_timeout_secs {
        config.credential_request_timeout = Duration::from_secs(timeout);
    }
}

/// Parse an environment value, warning about values that do not parse
fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    let parsed = value.trim().parse::<T>().ok();
    if parsed.is_none() {
        tracing::warn!(key, value, "Ignoring unparseable environment variable");
    }
    parsed
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut BridgeConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    // Endpoint settings from environment
    if let Some(mode) = env("BRIDGE_AUTH_MODE") {
        match mode.parse::<AuthModeSetting>() {
            Ok(mode) => {
                config.auth_mode = mode;
                config.source = ConfigSource::Env;
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring BRIDGE_AUTH_MODE"),
        }
    }
    if let Some(host) = env("BRIDGE_HOST") {
        config.host = Some(host);
        config.source = ConfigSource::Env;
    }
    if let Some(name) = env("BRIDGE_ENDPOINT") {
        config.endpoint_name = Some(name);
        config.source = ConfigSource::Env;
    }

    // History settings from environment
    if let Some(turns) = env("BRIDGE_MAX_TURNS").and_then(|v| parse_env("BRIDGE_MAX_TURNS", &v)) {
        config.history.max_turns = turns;
        config.source = ConfigSource::Env;
    }
    if let Some(chars) = env("BRIDGE_MAX_CHARS").and_then(|v| parse_env("BRIDGE_MAX_CHARS", &v)) {
        config.history.max_chars = chars;
        config.source = ConfigSource::Env;
    }

    // Stream settings from environment
    if let Some(ms) =
        env("BRIDGE_IDLE_TIMEOUT_MS").and_then(|v| parse_env("BRIDGE_IDLE_TIMEOUT_MS", &v))
    {
        config.stream.idle_timeout_ms = ms;
        config.source = ConfigSource::Env;
    }
    if let Some(ms) =
        env("BRIDGE_CONNECT_TIMEOUT_MS").and_then(|v| parse_env("BRIDGE_CONNECT_TIMEOUT_MS", &v))
    {
        config.stream.connect_timeout_ms = ms;
        config.source = ConfigSource::Env;
    }

    // Credential settings from environment
    if let Some(secs) = env("BRIDGE_REFRESH_MARGIN_SECS")
        .and_then(|v| parse_env::<u64>("BRIDGE_REFRESH_MARGIN_SECS", &v))
    {
        config.refresh_margin = Duration::from_secs(secs);
        config.source = ConfigSource::Env;
    }
    if let Some(instance) = env("BRIDGE_DB_INSTANCE") {
        config.db_instance = Some(instance);
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides,
/// then call [`BridgeConfig::validate`] again.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Auth mode override
    pub auth_mode: Option<AuthModeSetting>,

    /// Host override
    pub host: Option<String>,

    /// Endpoint name override
    pub endpoint_name: Option<String>,

    /// Max turns override
    pub max_turns: Option<usize>,

    /// Max chars override
    pub max_chars: Option<usize>,

    /// Idle timeout override (milliseconds)
    pub idle_timeout_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set auth mode override
    #[must_use]
    pub fn with_auth_mode(mut self, mode: AuthModeSetting) -> Self {
        self.auth_mode = Some(mode);
        self
    }

    /// Set host override
    #[must_use]
    pub fn with_host(mut self, host: String) -> Self {
        self.host = Some(host);
        self
    }

    /// Set endpoint name override
    #[must_use]
    pub fn with_endpoint_name(mut self, name: String) -> Self {
        self.endpoint_name = Some(name);
        self
    }

    /// Set max turns override
    #[must_use]
    pub fn with_max_turns(mut self, turns: usize) -> Self {
        self.max_turns = Some(turns);
        self
    }

    /// Set max chars override
    #[must_use]
    pub fn with_max_chars(mut self, chars: usize) -> Self {
        self.max_chars = Some(chars);
        self
    }

    /// Set idle timeout override
    #[must_use]
    pub fn with_idle_timeout_ms(mut self, ms: u64) -> Self {
        self.idle_timeout_ms = Some(ms);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut BridgeConfig) {
        if self.auth_mode.is_some()
            || self.host.is_some()
            || self.endpoint_name.is_some()
            || self.max_turns.is_some()
            || self.max_chars.is_some()
            || self.idle_timeout_ms.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(mode) = self.auth_mode {
            config.auth_mode = mode;
        }
        if let Some(ref host) = self.host {
            config.host = Some(host.clone());
        }
        if let Some(ref name) = self.endpoint_name {
            config.endpoint_name = Some(name.clone());
        }
        if let Some(turns) = self.max_turns {
            config.history.max_turns = turns;
        }
        if let Some(chars) = self.max_chars {
            config.history.max_chars = chars;
        }
        if let Some(ms) = self.idle_timeout_ms {
            config.stream.idle_timeout_ms = ms;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
