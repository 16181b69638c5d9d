//! Configuration loading with layered overrides.
//!
//! Config is loaded in order (each layer overrides the previous):
//! 1. Default values
//! 2. Config file (TOML)
//! 3. Environment variables
//! 4. CLI arguments
//!
//! The result is validated before it is returned, so a zero burst or a
//! negative rate stops the process at startup instead of misbehaving later.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::rate_limit::Mode;

/// Config shared across request handlers.
pub type SharedConfig = Arc<Config>;

/// Service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: App,
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Application identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct App {
    #[serde(default = "default_app_name")]
    pub name: String,
    /// `development` or `production`. Production forces JSON logs.
    #[serde(default = "default_env")]
    pub env: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            env: default_env(),
        }
    }
}

impl App {
    pub fn is_production(&self) -> bool {
        self.env.eq_ignore_ascii_case("production")
    }
}

fn default_app_name() -> String {
    "tollgate".to_string()
}

fn default_env() -> String {
    "development".to_string()
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Peers whose `X-Forwarded-For` / `X-Real-IP` headers are believed.
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    /// How long shutdown waits for open connections to finish.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            trusted_proxies: Vec::new(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Admission control settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: Mode,
    /// Aggregate requests per second across all clients.
    #[serde(default = "default_global_rate")]
    pub global_rate: f64,
    #[serde(default = "default_global_burst")]
    pub global_burst: u32,
    /// Requests per second for a single client.
    #[serde(default = "default_client_rate")]
    pub client_rate: f64,
    #[serde(default = "default_client_burst")]
    pub client_burst: u32,
    /// How often idle client buckets are swept.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// A bucket idle for `cleanup_interval_secs * idle_expiry_multiplier` is evicted.
    #[serde(default = "default_idle_expiry_multiplier")]
    pub idle_expiry_multiplier: u32,
    /// Longest a request may queue for tokens in `wait` mode.
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: Mode::default(),
            global_rate: default_global_rate(),
            global_burst: default_global_burst(),
            client_rate: default_client_rate(),
            client_burst: default_client_burst(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            idle_expiry_multiplier: default_idle_expiry_multiplier(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

/// One year. Longer sweep intervals overflow timer deadlines.
const MAX_CLEANUP_INTERVAL_SECS: u64 = 365 * 24 * 60 * 60;

impl RateLimitConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn idle_expiry(&self) -> Duration {
        self.cleanup_interval()
            .saturating_mul(self.idle_expiry_multiplier)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    fn validate(&self) -> crate::Result<()> {
        crate::rate_limit::bucket::validate(self.global_rate, self.global_burst)
            .map_err(|e| Error::Config(format!("rate_limit.global: {e}")))?;
        crate::rate_limit::bucket::validate(self.client_rate, self.client_burst)
            .map_err(|e| Error::Config(format!("rate_limit.client: {e}")))?;
        if self.cleanup_interval_secs == 0 {
            return Err(Error::Config(
                "rate_limit.cleanup_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.cleanup_interval_secs > MAX_CLEANUP_INTERVAL_SECS {
            return Err(Error::Config(format!(
                "rate_limit.cleanup_interval_secs must be at most {MAX_CLEANUP_INTERVAL_SECS}, got {}",
                self.cleanup_interval_secs
            )));
        }
        if self.idle_expiry_multiplier == 0 {
            return Err(Error::Config(
                "rate_limit.idle_expiry_multiplier must be at least 1".to_string(),
            ));
        }
        if self
            .cleanup_interval()
            .checked_mul(self.idle_expiry_multiplier)
            .is_none()
        {
            return Err(Error::Config(
                "rate_limit.idle_expiry_multiplier is too large for the cleanup interval"
                    .to_string(),
            ));
        }
        if self.mode == Mode::Wait && self.max_wait_ms == 0 {
            return Err(Error::Config(
                "rate_limit.max_wait_ms must be at least 1 in wait mode".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_global_rate() -> f64 {
    100.0
}

fn default_global_burst() -> u32 {
    200
}

fn default_client_rate() -> f64 {
    10.0
}

fn default_client_burst() -> u32 {
    20
}

fn default_cleanup_interval_secs() -> u64 {
    30 * 60
}

fn default_idle_expiry_multiplier() -> u32 {
    2
}

fn default_max_wait_ms() -> u64 {
    5_000
}

impl Config {
    /// Check values that would otherwise fail at runtime.
    pub fn validate(&self) -> crate::Result<()> {
        for proxy in &self.server.trusted_proxies {
            proxy.parse::<std::net::IpAddr>().map_err(|_| {
                Error::Config(format!("server.trusted_proxies: invalid IP address {proxy:?}"))
            })?;
        }
        match self.log.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(Error::Config(format!(
                    "log.format must be \"pretty\" or \"json\", got {other:?}"
                )));
            }
        }
        self.rate_limit.validate()
    }
}

/// Builder for loading configuration with customizable options.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Environment variable prefix (e.g., "MYAPP" -> MYAPP_HOST, MYAPP_PORT)
    pub env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self {
            env_prefix: "TOLLGATE".to_string(),
        }
    }
}

impl ConfigLoader {
    /// Create a new config loader with the given environment prefix.
    pub fn new(env_prefix: impl Into<String>) -> Self {
        Self {
            env_prefix: env_prefix.into(),
        }
    }

    /// Load configuration from file, environment, and CLI arguments.
    ///
    /// # Arguments
    /// * `config_path` - Optional path to TOML config file
    /// * `cli_host` - CLI override for host
    /// * `cli_port` - CLI override for port
    pub fn load(
        &self,
        config_path: Option<&Path>,
        cli_host: Option<&str>,
        cli_port: Option<u16>,
    ) -> crate::Result<Config> {
        let mut config: Config = if let Some(path) = config_path {
            let content = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;
            toml::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse config: {e}")))?
        } else {
            Config::default()
        };

        let prefix = &self.env_prefix;

        if let Ok(host) = std::env::var(format!("{prefix}_HOST")) {
            config.server.host = host;
        }
        if let Ok(port) = std::env::var(format!("{prefix}_PORT"))
            && let Ok(p) = port.parse()
        {
            config.server.port = p;
        }
        if let Ok(env) = std::env::var(format!("{prefix}_ENV")) {
            config.app.env = env;
        }
        if let Ok(level) = std::env::var(format!("{prefix}_LOG_LEVEL")) {
            config.log.level = level;
        }
        if let Ok(format) = std::env::var(format!("{prefix}_LOG_FORMAT")) {
            config.log.format = format;
        }

        if let Some(host) = cli_host {
            config.server.host = host.to_string();
        }
        if let Some(port) = cli_port {
            config.server.port = port;
        }

        config.validate()?;
        Ok(config)
    }
}
