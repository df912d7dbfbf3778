//! Gateway Configuration
//!
//! Centralized configuration loading for the planning gateway, supporting a
//! TOML file at `~/.config/fiber-planning/gateway.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the daemon via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 5000
//! max_request_bytes = 10485760
//!
//! [cache]
//! ttl_secs = 86400
//! max_entries = 10000
//! sweep_interval_secs = 60
//!
//! [dispatch]
//! max_concurrent = 64
//! queue_timeout_ms = 5000
//!
//! [feedback]
//! dir = "/var/lib/fiber-planning/feedback"
//!
//! [[tiers]]
//! id = "A"
//! endpoint = "http://localhost:8000"
//! max_sites = 20
//! timeout_secs = 5
//!
//! [[tiers]]
//! id = "B"
//! endpoint = "http://localhost:8001"
//! max_sites = 1000
//! timeout_secs = 600
//! ```
//!
//! A `[[tiers]]` list in the file replaces the default tiers entirely.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{DEFAULT_MAX_ENTRIES, DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL};
use crate::routing::{DispatchConfig, Tier, TierTable};

/// Default maximum request body: 10 MiB
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 10 * 1024 * 1024;

/// Default feedback directory
pub const DEFAULT_FEEDBACK_DIR: &str = "/tmp/fiber_feedback";

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

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// Bind address
    pub host: Option<String>,

    /// Bind port
    pub port: Option<u16>,

    /// Maximum accepted request body in bytes
    pub max_request_bytes: Option<usize>,
}

/// Cache section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheToml {
    /// Result time-to-live in seconds
    pub ttl_secs: Option<u64>,

    /// Maximum cached results
    pub max_entries: Option<usize>,

    /// Seconds between expired-entry sweeps
    pub sweep_interval_secs: Option<u64>,
}

/// Dispatch section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchToml {
    /// Maximum simultaneous dispatches
    pub max_concurrent: Option<usize>,

    /// Milliseconds a dispatch may wait for capacity
    pub queue_timeout_ms: Option<u64>,
}

/// Feedback section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackToml {
    /// Directory for feedback files
    pub dir: Option<PathBuf>,
}

/// One `[[tiers]]` entry
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TierToml {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub endpoint: String,
    pub max_sites: usize,
    pub timeout_secs: u64,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl From<&TierToml> for Tier {
    fn from(toml: &TierToml) -> Self {
        let mut tier = Tier::new(
            toml.id.clone(),
            toml.endpoint.clone(),
            toml.max_sites,
            Duration::from_secs(toml.timeout_secs),
        );
        if let Some(ref name) = toml.name {
            tier = tier.with_name(name.clone());
        }
        if let Some(ref description) = toml.description {
            tier = tier.with_description(description.clone());
        }
        if let Some(enabled) = toml.enabled {
            tier = tier.with_enabled(enabled);
        }
        tier
    }
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayToml {
    pub server: ServerToml,
    pub cache: CacheToml,
    pub dispatch: DispatchToml,
    pub feedback: FeedbackToml,
    pub tiers: Option<Vec<TierToml>>,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// HTTP listener settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_request_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
        }
    }
}

/// Result cache settings (read once at startup)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub max_entries: usize,
    pub sweep_interval: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Centralized configuration for the gateway
///
/// Use [`load_config`] to load configuration with proper priority handling.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// HTTP listener
    pub server: ServerSettings,

    /// Result cache
    pub cache: CacheSettings,

    /// Dispatcher limits
    pub dispatch: DispatchConfig,

    /// Where feedback files are written
    pub feedback_dir: PathBuf,

    /// Planning tiers
    pub tiers: Vec<Tier>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            cache: CacheSettings::default(),
            dispatch: DispatchConfig::default(),
            feedback_dir: PathBuf::from(DEFAULT_FEEDBACK_DIR),
            tiers: vec![
                Tier::default_fast("http://localhost:8000"),
                Tier::default_high_capacity("http://localhost:8001"),
            ],
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl GatewayConfig {
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

    /// Socket address string for the listener
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Check cross-field invariants
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` describing the first problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tiers.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one tier must be configured".to_string(),
            ));
        }
        TierTable::new(self.tiers.clone())
            .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

        if let Some(tier) = self.tiers.iter().find(|t| t.endpoint.trim().is_empty()) {
            return Err(ConfigError::ValidationError(format!(
                "tier {} has an empty endpoint",
                tier.id
            )));
        }
        if self.server.max_request_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_request_bytes must be greater than zero".to_string(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::ValidationError(
                "cache max_entries must be greater than zero".to_string(),
            ));
        }
        if self.dispatch.max_concurrent == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch max_concurrent must be greater than zero".to_string(),
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
/// Returns `$XDG_CONFIG_HOME/fiber-planning/gateway.toml` or
/// `~/.config/fiber-planning/gateway.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("fiber-planning").join("gateway.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resulting configuration is invalid. A missing config file is not an
/// error (defaults are used).
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if validation fails.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<GatewayConfig, ConfigError> {
    let mut config = load_file_layer(path)?;
    apply_env_config(&mut config);
    config.validate()?;
    Ok(config)
}

/// Defaults overlaid with the TOML file (no environment)
fn load_file_layer(path: Option<PathBuf>) -> Result<GatewayConfig, ConfigError> {
    let mut config = GatewayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: GatewayToml = toml::from_str(&toml_content)?;
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

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut GatewayConfig, toml: &GatewayToml) {
    // Server settings
    if let Some(ref host) = toml.server.host {
        config.server.host = host.clone();
    }
    if let Some(port) = toml.server.port {
        config.server.port = port;
    }
    if let Some(bytes) = toml.server.max_request_bytes {
        config.server.max_request_bytes = bytes;
    }

    // Cache settings
    if let Some(ttl) = toml.cache.ttl_secs {
        config.cache.ttl = Duration::from_secs(ttl);
    }
    if let Some(max) = toml.cache.max_entries {
        config.cache.max_entries = max;
    }
    if let Some(interval) = toml.cache.sweep_interval_secs {
        config.cache.sweep_interval = Duration::from_secs(interval);
    }

    // Dispatch settings
    if let Some(max) = toml.dispatch.max_concurrent {
        config.dispatch.max_concurrent = max;
    }
    if let Some(ms) = toml.dispatch.queue_timeout_ms {
        config.dispatch.queue_timeout = Duration::from_millis(ms);
    }

    if let Some(ref dir) = toml.feedback.dir {
        config.feedback_dir = dir.clone();
    }

    if let Some(ref tiers) = toml.tiers {
        config.tiers = tiers.iter().map(Tier::from).collect();
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut GatewayConfig) {
    apply_env_config_from(config, |key| std::env::var(key).ok());
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    let parsed = value.trim().parse().ok();
    if parsed.is_none() {
        tracing::warn!(key, value, "Ignoring unparseable environment variable");
    }
    parsed
}

/// Apply overrides from an arbitrary variable lookup
fn apply_env_config_from<F>(config: &mut GatewayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(host) = lookup("CLIENT_HOST") {
        config.server.host = host;
        config.source = ConfigSource::Env;
    }
    if let Some(port) = lookup("CLIENT_PORT").and_then(|v| parse_env("CLIENT_PORT", &v)) {
        config.server.port = port;
        config.source = ConfigSource::Env;
    }
    if let Some(bytes) = lookup("MAX_UPLOAD_SIZE").and_then(|v| parse_env("MAX_UPLOAD_SIZE", &v))
    {
        config.server.max_request_bytes = bytes;
        config.source = ConfigSource::Env;
    }

    // Tier endpoints
    for (key, tier_id) in [("SERVER_A_URL", "A"), ("SERVER_B_URL", "B")] {
        if let Some(url) = lookup(key) {
            match config.tiers.iter_mut().find(|t| t.id == tier_id) {
                Some(tier) => {
                    tier.endpoint = url;
                    config.source = ConfigSource::Env;
                }
                None => tracing::warn!(key, tier = tier_id, "No such tier, ignoring"),
            }
        }
    }

    if let Some(ttl) = lookup("CACHE_TTL").and_then(|v| parse_env::<u64>("CACHE_TTL", &v)) {
        config.cache.ttl = Duration::from_secs(ttl);
        config.source = ConfigSource::Env;
    }
    if let Some(max) =
        lookup("CACHE_MAX_ENTRIES").and_then(|v| parse_env("CACHE_MAX_ENTRIES", &v))
    {
        config.cache.max_entries = max;
        config.source = ConfigSource::Env;
    }
    if let Some(max) =
        lookup("GATEWAY_MAX_CONCURRENT").and_then(|v| parse_env("GATEWAY_MAX_CONCURRENT", &v))
    {
        config.dispatch.max_concurrent = max;
        config.source = ConfigSource::Env;
    }
    if let Some(dir) = lookup("FEEDBACK_DIR") {
        config.feedback_dir = PathBuf::from(dir);
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
    /// Bind host override
    pub host: Option<String>,

    /// Bind port override
    pub port: Option<u16>,

    /// Feedback directory override
    pub feedback_dir: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set host override
    #[must_use]
    pub fn with_host(mut self, host: String) -> Self {
        self.host = Some(host);
        self
    }

    /// Set port override
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set feedback directory override
    #[must_use]
    pub fn with_feedback_dir(mut self, dir: PathBuf) -> Self {
        self.feedback_dir = Some(dir);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut GatewayConfig) {
        if self.host.is_some() || self.port.is_some() || self.feedback_dir.is_some() {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref host) = self.host {
            config.server.host = host.clone();
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(ref dir) = self.feedback_dir {
            config.feedback_dir = dir.clone();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
