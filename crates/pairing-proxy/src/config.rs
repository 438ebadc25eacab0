//! Configuration for the pairing proxy.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use session_core::hooks::DEFAULT_WELCOME;
use std::path::PathBuf;
use std::time::Duration;

/// Proxy configuration.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Credential store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Protocol bridge configuration
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Pairing behaviour
    #[serde(default)]
    pub pairing: PairingSettings,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Deserialize)]
pub struct StoreConfig {
    /// Store connection string (`memory://` or `file:///path`); in-memory when unset
    #[serde(default)]
    pub url: Option<String>,

    /// Logical database below the store location
    #[serde(default = "default_database")]
    pub database: String,

    /// Secret for encrypting stored credentials at rest
    #[serde(default)]
    pub encryption_secret: Option<SecretString>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    /// Protocol bridge REST API URL
    #[serde(default = "default_bridge_api_url")]
    pub api_url: String,

    /// Event poll interval
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PairingSettings {
    /// Bound on waiting for protocol readiness
    #[serde(default = "default_ready_timeout", with = "humantime_serde")]
    pub ready_timeout: Duration,

    /// Root of the local credential cache
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Message sent to the linked account once the session opens
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,

    /// Whether to send the welcome message at all
    #[serde(default = "default_true")]
    pub send_welcome: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Global requests per minute
    #[serde(default = "default_global_rpm")]
    pub global_per_minute: u32,

    /// Pairing requests per minute for any single number
    #[serde(default = "default_number_rpm")]
    pub number_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

// Default implementations
impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            database: default_database(),
            encryption_secret: None,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            api_url: default_bridge_api_url(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl Default for PairingSettings {
    fn default() -> Self {
        Self {
            ready_timeout: default_ready_timeout(),
            cache_dir: default_cache_dir(),
            welcome_message: default_welcome_message(),
            send_welcome: true,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_per_minute: default_global_rpm(),
            number_per_minute: default_number_rpm(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// Default value functions
fn default_database() -> String {
    "pairing".into()
}

fn default_bridge_api_url() -> String {
    "http://protocol-bridge:8080".into()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_ready_timeout() -> Duration {
    session_core::coordinator::DEFAULT_READY_TIMEOUT
}

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir()
}

fn default_welcome_message() -> String {
    DEFAULT_WELCOME.into()
}

fn default_true() -> bool {
    true
}

fn default_listen_addr() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8000
}

fn default_global_rpm() -> u32 {
    30
}

fn default_number_rpm() -> u32 {
    5
}

fn default_log_level() -> String {
    "info".into()
}

fn environment() -> config::Environment {
    config::Environment::default()
        .separator("__")
        .try_parsing(false)
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        Self::from_environment(environment())
    }

    fn from_environment(source: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(source)
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
