//! Configuration System
//!
//! Loads service configuration from a TOML file with `FANOUT_*`
//! environment variable overrides, and converts the raw sections into the
//! typed settings each component takes.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::api::ApiConfig;
use crate::bridge::{Backoff, KafkaSettings, RetryPolicy};
use crate::push::{ApnsConfig, PoolConfig};
use crate::websocket::HubConfig;

/// Top-level service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub hub: HubSettings,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub push: PushConfig,

    #[serde(default)]
    pub directory: DirectoryConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP / WebSocket listener
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8090
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_size: default_max_body_size(),
        }
    }
}

/// Connection registry tuning
#[derive(Debug, Clone, Deserialize)]
pub struct HubSettings {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// 0 disables keepalive pings
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,

    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
}

fn default_queue_capacity() -> usize {
    256
}

fn default_keepalive_secs() -> u64 {
    30
}

fn default_close_grace_ms() -> u64 {
    5000
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            keepalive_secs: default_keepalive_secs(),
            close_grace_ms: default_close_grace_ms(),
        }
    }
}

/// Kafka subscription
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_brokers")]
    pub brokers: String,

    #[serde(default = "default_topic")]
    pub topic: String,

    #[serde(default)]
    pub partition: i32,

    #[serde(default = "default_group_id")]
    pub group_id: String,

    #[serde(default = "default_metadata_timeout_ms")]
    pub metadata_timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_brokers() -> String {
    "localhost:9092".to_string()
}

fn default_topic() -> String {
    "posts".to_string()
}

fn default_group_id() -> String {
    "fanout".to_string()
}

fn default_metadata_timeout_ms() -> u64 {
    5000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            topic: default_topic(),
            partition: 0,
            group_id: default_group_id(),
            metadata_timeout_ms: default_metadata_timeout_ms(),
            retry: RetryConfig::default(),
        }
    }
}

/// Subscription retry; `max_attempts = 0` retries forever
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,

    #[serde(default)]
    pub backoff: Backoff,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_retry_delay_ms() -> u64 {
    5000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_retry_delay_ms(),
            backoff: Backoff::default(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Push delivery
#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    #[serde(default = "default_push_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_job_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    pub fcm: Option<FcmSettings>,

    pub apns: Option<ApnsSettings>,
}

fn default_push_timeout_ms() -> u64 {
    5000
}

fn default_max_concurrency() -> usize {
    64
}

fn default_workers() -> usize {
    4
}

fn default_job_queue_capacity() -> usize {
    1024
}

fn default_drain_timeout_ms() -> u64 {
    10_000
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_push_timeout_ms(),
            max_concurrency: default_max_concurrency(),
            workers: default_workers(),
            queue_capacity: default_job_queue_capacity(),
            drain_timeout_ms: default_drain_timeout_ms(),
            fcm: None,
            apns: None,
        }
    }
}

/// Firebase Cloud Messaging (Android)
#[derive(Debug, Clone, Deserialize)]
pub struct FcmSettings {
    /// Falls back to the service account's `project_id`
    pub project_id: Option<String>,
    pub service_account_path: PathBuf,
}

/// Apple Push Notification service (iOS)
#[derive(Debug, Clone, Deserialize)]
pub struct ApnsSettings {
    pub certificate_path: PathBuf,

    #[serde(default)]
    pub certificate_password: String,

    pub bundle_id: String,

    #[serde(default)]
    pub production: bool,
}

/// Recipient directory (device token lookup)
#[derive(Debug, Clone, Deserialize)]
pub struct DirectoryConfig {
    /// Push triggers are disabled without a base URL
    pub base_url: Option<String>,

    #[serde(default = "default_directory_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_directory_timeout_ms() -> u64 {
    3000
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_ms: default_directory_timeout_ms(),
        }
    }
}

/// Connection authorization
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt_secret: String,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Parse a TOML file without environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Defaults plus environment overrides
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load a file, then apply `FANOUT_*` overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// First readable file among the standard locations, else defaults plus environment
    pub fn load_default() -> (Self, LoadReport) {
        let config_paths: Vec<PathBuf> = [
            dirs::config_dir().map(|p| p.join("fanout").join("config.toml")),
            Some(PathBuf::from("/etc/fanout/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self::load_first(&config_paths)
    }

    /// Load the first candidate that exists and parses.
    ///
    /// Nothing is logged here; callers log the report once tracing is set up.
    pub fn load_first(paths: &[PathBuf]) -> (Self, LoadReport) {
        let mut report = LoadReport::default();

        for path in paths.iter().filter(|p| p.exists()) {
            match Self::load_with_env(path) {
                Ok(config) => {
                    report.source = Some(path.clone());
                    return (config, report);
                }
                Err(e) => report.failures.push(e),
            }
        }

        (Self::from_env(), report)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply `FANOUT_*` overrides from an arbitrary lookup
    fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server
        if let Some(host) = var("FANOUT_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("FANOUT_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }

        // Broker
        if let Some(brokers) = var("FANOUT_KAFKA_BROKERS") {
            self.broker.brokers = brokers;
        }
        if let Some(topic) = var("FANOUT_KAFKA_TOPIC") {
            self.broker.topic = topic;
        }
        if let Some(group_id) = var("FANOUT_KAFKA_GROUP_ID") {
            self.broker.group_id = group_id;
        }

        // Auth
        if let Some(secret) = var("FANOUT_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }

        // Push
        if let Some(apns) = self.push.apns.as_mut() {
            if let Some(password) = var("FANOUT_APNS_CERT_PASSWORD") {
                apns.certificate_password = password;
            }
            if let Some(stage) = var("FANOUT_STAGE") {
                apns.production = stage.eq_ignore_ascii_case("production");
            }
        }
        if let Some(url) = var("FANOUT_DIRECTORY_URL") {
            self.directory.base_url = Some(url);
        }

        // Logging
        if let Some(level) = var("FANOUT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = var("FANOUT_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            max_body_size: self.server.max_body_size,
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            queue_capacity: self.hub.queue_capacity.max(1),
            keepalive_interval: match self.hub.keepalive_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            close_grace: Duration::from_millis(self.hub.close_grace_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let retry = &self.broker.retry;
        RetryPolicy {
            max_attempts: (retry.max_attempts > 0).then_some(retry.max_attempts),
            delay: Duration::from_millis(retry.delay_ms),
            backoff: retry.backoff,
            max_delay: Duration::from_millis(retry.max_delay_ms.max(retry.delay_ms)),
        }
    }

    pub fn kafka_settings(&self) -> KafkaSettings {
        KafkaSettings {
            brokers: self.broker.brokers.clone(),
            topic: self.broker.topic.clone(),
            partition: self.broker.partition,
            group_id: self.broker.group_id.clone(),
            metadata_timeout: Duration::from_millis(self.broker.metadata_timeout_ms),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            workers: self.push.workers.max(1),
            queue_capacity: self.push.queue_capacity.max(1),
            drain_timeout: Duration::from_millis(self.push.drain_timeout_ms),
        }
    }

    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push.request_timeout_ms)
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_millis(self.directory.request_timeout_ms)
    }

    /// APNs gateway settings, if the `[push.apns]` section is present
    pub fn apns_config(&self) -> Option<ApnsConfig> {
        self.push.apns.as_ref().map(|apns| ApnsConfig {
            certificate_path: apns.certificate_path.clone(),
            certificate_password: apns.certificate_password.clone(),
            bundle_id: apns.bundle_id.clone(),
            production: apns.production,
            request_timeout: self.push_timeout(),
        })
    }
}

/// Where the configuration came from
#[derive(Debug, Default)]
pub struct LoadReport {
    /// File that was loaded, `None` for defaults plus environment
    pub source: Option<PathBuf>,
    /// Candidates that existed but could not be loaded
    pub failures: Vec<ConfigError>,
}

impl LoadReport {
    pub fn from_file(path: &Path) -> Self {
        Self {
            source: Some(path.to_path_buf()),
            failures: Vec::new(),
        }
    }

    pub fn log(&self) {
        for e in &self.failures {
            tracing::warn!("{}", e);
        }
        match &self.source {
            Some(path) => tracing::info!("Loaded config from {:?}", path),
            None => tracing::info!("Using default config with environment overrides"),
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Commented template written by `fanout init-config`
pub fn generate_default_config() -> String {
    r#"# Fanout Configuration
#
# Environment variables override these settings:
# - FANOUT_HOST, FANOUT_PORT
# - FANOUT_KAFKA_BROKERS, FANOUT_KAFKA_TOPIC, FANOUT_KAFKA_GROUP_ID
# - FANOUT_JWT_SECRET
# - FANOUT_APNS_CERT_PASSWORD
# - FANOUT_STAGE (production selects the production APNs endpoint)
# - FANOUT_DIRECTORY_URL
# - FANOUT_LOG_LEVEL, FANOUT_LOG_FORMAT

[server]
host = "0.0.0.0"
port = 8090

# Maximum request body size (bytes)
max_body_size = 1048576

[hub]
# Per-connection outbound queue; a full queue evicts the connection
queue_capacity = 256

# Keepalive ping interval (0 disables)
keepalive_secs = 30

# How long a closing connection may flush queued messages (ms)
close_grace_ms = 5000

[broker]
brokers = "localhost:9092"
topic = "posts"
partition = 0
group_id = "fanout"
metadata_timeout_ms = 5000

[broker.retry]
# Subscription attempts before giving up (0 = forever)
max_attempts = 10
delay_ms = 5000

# fixed or exponential
backoff = "fixed"
max_delay_ms = 60000

[push]
# Per-recipient gateway timeout (ms)
request_timeout_ms = 5000

# Concurrent gateway calls per platform
max_concurrency = 64

# Notification jobs
workers = 4
queue_capacity = 1024
drain_timeout_ms = 10000

# [push.fcm]
# project_id = "my-project"
# service_account_path = "/etc/fanout/service-account.json"

# [push.apns]
# certificate_path = "/etc/fanout/apns.p12"
# certificate_password = ""
# bundle_id = "com.example.app"
# production = false

[directory]
# Device token lookup; push triggers are disabled without it
# base_url = "http://localhost:8080"
request_timeout_ms = 3000

[auth]
# HS256 secret for connection tokens
jwt_secret = ""

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
