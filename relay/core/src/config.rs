//! TOML Configuration File Support
//!
//! Loads relay settings from `$XDG_CONFIG_HOME/relay/relay.toml`
//! (typically `~/.config/relay/relay.toml`).
//!
//! # Configuration Priority
//!
//! Values are resolved with the following priority (highest first):
//! 1. CLI arguments (applied by the caller through [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [buffer]
//! capacity = 16
//!
//! [hub]
//! ingress_capacity = 1
//!
//! [counter]
//! top = 10
//! max_key_len = 32
//!
//! [logging]
//! level = "info"
//! ```
//!
//! Capacities are read as signed integers so that a negative value is
//! reported as a validation error instead of a parse error.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::hub::{HubConfig, DEFAULT_INGRESS_CAPACITY};

/// Default capacity of a standalone buffer's endpoints
pub const DEFAULT_BUFFER_CAPACITY: usize = 16;

/// Default number of counter entries to report
pub const DEFAULT_TOP: usize = 10;

/// Default maximum length of a counter key
pub const DEFAULT_MAX_KEY_LEN: usize = 32;

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

const ENV_BUFFER_CAPACITY: &str = "RELAY_BUFFER_CAPACITY";
const ENV_INGRESS_CAPACITY: &str = "RELAY_INGRESS_CAPACITY";
const ENV_TOP: &str = "RELAY_TOP";
const ENV_MAX_KEY_LEN: &str = "RELAY_MAX_KEY_LEN";
const ENV_LOG_LEVEL: &str = "RELAY_LOG_LEVEL";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the winning configuration values came from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
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

/// `[buffer]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferToml {
    /// Endpoint capacity of standalone buffers
    pub capacity: Option<i64>,
}

/// `[hub]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HubToml {
    /// Endpoint capacity of the hub's ingress buffer
    pub ingress_capacity: Option<i64>,
}

/// `[counter]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterToml {
    /// How many entries to report
    pub top: Option<usize>,
    /// Longest key accepted by the counter
    pub max_key_len: Option<usize>,
}

/// `[logging]` section
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingToml {
    /// Level name (`error`, `warn`, `info`, `debug`, `trace`, `off`)
    pub level: Option<String>,
}

/// Root of the TOML file
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayToml {
    /// `[buffer]`
    pub buffer: BufferToml,
    /// `[hub]`
    pub hub: HubToml,
    /// `[counter]`
    pub counter: CounterToml,
    /// `[logging]`
    pub logging: LoggingToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Fully resolved, validated configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    /// Endpoint capacity of standalone buffers (0 = rendezvous)
    pub buffer_capacity: usize,

    /// Hub tuning
    pub hub: HubConfig,

    /// How many counter entries to report
    pub top: usize,

    /// Longest key accepted by the counter
    pub max_key_len: usize,

    /// Log level used when `RUST_LOG` is not set
    pub log_level: String,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            hub: HubConfig {
                ingress_capacity: DEFAULT_INGRESS_CAPACITY,
            },
            top: DEFAULT_TOP,
            max_key_len: DEFAULT_MAX_KEY_LEN,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl RelayConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }
}

// =============================================================================
// Validation
// =============================================================================

fn capacity(key: &str, value: i64) -> Result<usize, ConfigError> {
    usize::try_from(value).map_err(|_| {
        ConfigError::Validation(format!("{key} must be zero or positive, got {value}"))
    })
}

fn positive(key: &str, value: usize) -> Result<usize, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Validation(format!("{key} must be at least 1")));
    }
    Ok(value)
}

fn log_level(value: &str) -> Result<String, ConfigError> {
    let unknown = || ConfigError::Validation(format!("unknown log level {value:?}"));
    if value.trim().is_empty() {
        return Err(unknown());
    }
    value
        .trim()
        .parse::<LevelFilter>()
        .map(|filter| filter.to_string().to_ascii_lowercase())
        .map_err(|_| unknown())
}

fn env_value<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| ConfigError::Validation(format!("{key}={raw:?}: {e}"))),
        Err(_) => Ok(None),
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/relay/relay.toml` or
/// `~/.config/relay/relay.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("relay").join("relay.toml"))
}

/// Load configuration from the default path, then the environment
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed,
/// or if any value fails validation. A missing file is not an error.
pub fn load_config() -> Result<RelayConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path, then the environment
///
/// # Errors
///
/// Same as [`load_config`].
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<RelayConfig, ConfigError> {
    let mut config = RelayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_config = read_toml(config_path)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config)?;

    Ok(config)
}

fn read_toml(path: &Path) -> Result<RelayToml, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&content)?)
}

fn apply_toml_config(config: &mut RelayConfig, toml: &RelayToml) -> Result<(), ConfigError> {
    if let Some(value) = toml.buffer.capacity {
        config.buffer_capacity = capacity("buffer.capacity", value)?;
    }
    if let Some(value) = toml.hub.ingress_capacity {
        config.hub.ingress_capacity = capacity("hub.ingress_capacity", value)?;
    }
    if let Some(value) = toml.counter.top {
        config.top = positive("counter.top", value)?;
    }
    if let Some(value) = toml.counter.max_key_len {
        config.max_key_len = positive("counter.max_key_len", value)?;
    }
    if let Some(ref value) = toml.logging.level {
        config.log_level = log_level(value)?;
    }
    Ok(())
}

fn apply_env_config(config: &mut RelayConfig) -> Result<(), ConfigError> {
    if let Some(value) = env_value::<i64>(ENV_BUFFER_CAPACITY)? {
        config.buffer_capacity = capacity(ENV_BUFFER_CAPACITY, value)?;
        config.source = ConfigSource::Env;
    }
    if let Some(value) = env_value::<i64>(ENV_INGRESS_CAPACITY)? {
        config.hub.ingress_capacity = capacity(ENV_INGRESS_CAPACITY, value)?;
        config.source = ConfigSource::Env;
    }
    if let Some(value) = env_value::<usize>(ENV_TOP)? {
        config.top = positive(ENV_TOP, value)?;
        config.source = ConfigSource::Env;
    }
    if let Some(value) = env_value::<usize>(ENV_MAX_KEY_LEN)? {
        config.max_key_len = positive(ENV_MAX_KEY_LEN, value)?;
        config.source = ConfigSource::Env;
    }
    if let Ok(value) = std::env::var(ENV_LOG_LEVEL) {
        config.log_level = log_level(value.trim())?;
        config.source = ConfigSource::Env;
    }
    Ok(())
}

// =============================================================================
// CLI Overrides
// =============================================================================

/// Values supplied on the command line
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Buffer capacity override
    pub buffer_capacity: Option<i64>,

    /// Ingress capacity override
    pub ingress_capacity: Option<i64>,

    /// Top-N override
    pub top: Option<usize>,

    /// Key length override
    pub max_key_len: Option<usize>,

    /// Log level override
    pub log_level: Option<String>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set buffer capacity override
    #[must_use]
    pub fn with_buffer_capacity(mut self, capacity: i64) -> Self {
        self.buffer_capacity = Some(capacity);
        self
    }

    /// Set ingress capacity override
    #[must_use]
    pub fn with_ingress_capacity(mut self, capacity: i64) -> Self {
        self.ingress_capacity = Some(capacity);
        self
    }

    /// Set top-N override
    #[must_use]
    pub fn with_top(mut self, top: usize) -> Self {
        self.top = Some(top);
        self
    }

    /// Set key length override
    #[must_use]
    pub fn with_max_key_len(mut self, len: usize) -> Self {
        self.max_key_len = Some(len);
        self
    }

    /// Set log level override
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.buffer_capacity.is_none()
            && self.ingress_capacity.is_none()
            && self.top.is_none()
            && self.max_key_len.is_none()
            && self.log_level.is_none()
    }

    /// Apply overrides to a configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] for a negative capacity, a zero
    /// top-N or key length, or an unknown log level. `config` is left
    /// untouched in that case.
    pub fn apply(&self, config: &mut RelayConfig) -> Result<(), ConfigError> {
        let mut updated = config.clone();

        if let Some(value) = self.buffer_capacity {
            updated.buffer_capacity = capacity("--capacity", value)?;
        }
        if let Some(value) = self.ingress_capacity {
            updated.hub.ingress_capacity = capacity("--ingress-capacity", value)?;
        }
        if let Some(value) = self.top {
            updated.top = positive("--top", value)?;
        }
        if let Some(value) = self.max_key_len {
            updated.max_key_len = positive("--max-key-len", value)?;
        }
        if let Some(ref value) = self.log_level {
            updated.log_level = log_level(value)?;
        }
        if !self.is_empty() {
            updated.source = ConfigSource::Cli;
        }

        *config = updated;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
