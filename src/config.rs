//! Configuration system for twin-qa
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (TWIN_QA_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Main client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QaConfig {
    /// Session service endpoint
    pub api: ApiSettings,

    /// Live stream reconnection policy
    pub stream: StreamSettings,

    /// Offline simulation settings
    pub demo: DemoSettings,

    /// Logging configuration
    pub logging: LoggingSettings,
}

/// Session service endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// Service base URL, without the API prefix
    pub base_url: String,

    /// Path prefix of the Q&A endpoints
    pub api_prefix: String,

    /// Timeout for request/response calls in seconds (streams are exempt)
    pub timeout_secs: u64,
}

/// Stream reconnection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Fixed delay before re-attaching a dropped stream, in milliseconds
    pub reconnect_interval_ms: u64,

    /// Maximum consecutive reconnection attempts (0 = infinite)
    pub max_reconnect_attempts: u32,

    /// Consecutive failures before the connection is reported as degraded
    pub escalate_after_attempts: u32,
}

/// Offline simulation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    /// Use the in-process simulated service instead of HTTP
    pub enabled: bool,

    /// Delay between simulated answers, in milliseconds
    pub response_delay_ms: u64,

    /// Size of the simulated persona directory
    pub persona_count: u32,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            api_prefix: "/api/v1/qa".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reconnect_interval_ms: 5000,
            max_reconnect_attempts: 0, // Infinite
            escalate_after_attempts: 3,
        }
    }
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            response_delay_ms: 1500,
            persona_count: 50,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            max_files: 5,
            json_format: false,
        }
    }
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl StreamSettings {
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
}

impl DemoSettings {
    pub fn response_delay(&self) -> Duration {
        Duration::from_millis(self.response_delay_ms)
    }
}

impl QaConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        let config_file = Self::find_config_file(config_path)?;
        if let Some(path) = config_file {
            debug!(path = %path.display(), "Loading configuration file");
            let content = fs::read_to_string(&path).map_err(|e| Error::IoRead {
                path: path.clone(),
                source: e,
            })?;
            config = Self::from_toml(&content)?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse {
            message: e.message().to_string(),
            source: Some(e),
        })
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path });
        }

        for path in Self::search_paths() {
            if path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Standard configuration locations, most specific first
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("twin-qa.toml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("twin-qa").join("config.toml"));
        }
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".twin-qa").join("config.toml"));
        }
        paths.push(PathBuf::from("/etc/twin-qa/config.toml"));
        paths
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // API settings
        if let Ok(val) = std::env::var("TWIN_QA_API_URL") {
            self.api.base_url = val;
        }
        if let Ok(val) = std::env::var("TWIN_QA_API_PREFIX") {
            self.api.api_prefix = val;
        }
        if let Ok(val) = std::env::var("TWIN_QA_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                self.api.timeout_secs = n;
            }
        }

        // Stream settings
        if let Ok(val) = std::env::var("TWIN_QA_RECONNECT_INTERVAL_MS") {
            if let Ok(n) = val.parse() {
                self.stream.reconnect_interval_ms = n;
            }
        }
        if let Ok(val) = std::env::var("TWIN_QA_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(n) = val.parse() {
                self.stream.max_reconnect_attempts = n;
            }
        }

        // Demo settings
        if let Ok(val) = std::env::var("TWIN_QA_DEMO") {
            self.demo.enabled = parse_bool(&val);
        }
        if let Ok(val) = std::env::var("TWIN_QA_DEMO_DELAY_MS") {
            if let Ok(n) = val.parse() {
                self.demo.response_delay_ms = n;
            }
        }

        // Logging settings
        if let Ok(val) = std::env::var("TWIN_QA_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Ok(val) = std::env::var("TWIN_QA_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Ok(val) = std::env::var("TWIN_QA_LOG_JSON") {
            self.logging.json_format = parse_bool(&val);
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.api.base_url).map_err(|e| {
            Error::config_field_invalid("api.base_url", format!("'{}' is not a valid URL: {}", self.api.base_url, e))
        })?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(Error::config_field_invalid(
                "api.base_url",
                "must start with http:// or https://",
            ));
        }
        if !self.api.api_prefix.is_empty() && !self.api.api_prefix.starts_with('/') {
            return Err(Error::config_field_invalid("api.api_prefix", "must start with '/'"));
        }
        if self.api.timeout_secs == 0 {
            return Err(Error::config_field_invalid("api.timeout_secs", "must be greater than 0"));
        }

        if self.stream.reconnect_interval_ms == 0 {
            return Err(Error::config_field_invalid(
                "stream.reconnect_interval_ms",
                "must be greater than 0",
            ));
        }
        if self.stream.escalate_after_attempts == 0 {
            return Err(Error::config_field_invalid(
                "stream.escalate_after_attempts",
                "must be greater than 0",
            ));
        }

        if self.demo.persona_count == 0 {
            return Err(Error::config_field_invalid("demo.persona_count", "must be greater than 0"));
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Full base URL of the Q&A endpoints
    pub fn service_url(&self) -> String {
        format!(
            "{}{}",
            self.api.base_url.trim_end_matches('/'),
            self.api.api_prefix.trim_end_matches('/')
        )
    }
}

fn parse_bool(val: &str) -> bool {
    val.eq_ignore_ascii_case("true") || val == "1"
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Default location written by `config init`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".twin-qa")
        .join("config.toml")
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(default_config_path);

    // Check if file exists
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    // Create parent directories
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    info!(path = %config_path.display(), "Configuration file created");
    Ok(config_path)
}

/// Generate default configuration content with comments
fn generate_default_config() -> String {
    r#"# twin-qa configuration

[api]
# Session service base URL
base_url = "http://localhost:8000"

# Path prefix of the Q&A endpoints
api_prefix = "/api/v1/qa"

# Request timeout in seconds (does not apply to live streams)
timeout_secs = 30

[stream]
# Delay before re-attaching a dropped stream, in milliseconds
reconnect_interval_ms = 5000

# Maximum consecutive reconnection attempts (0 = infinite)
max_reconnect_attempts = 0

# Consecutive failures before the connection is reported as degraded
escalate_after_attempts = 3

[demo]
# Use the offline simulated service
enabled = false

# Delay between simulated answers, in milliseconds
response_delay_ms = 1500

# Number of simulated personas
persona_count = 50

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log file path (comment out to disable file logging)
# file = "~/.twin-qa/logs/twin-qa.log"

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false
"#
    .to_string()
}
