//! Hookwire Configuration
//!
//! Settings are read from a TOML file and then overridden by `HW_*`
//! environment variables.
//!
//! ## Environment Variables
//!
//! | Variable | Section field |
//! |----------|---------------|
//! | `HW_DISPATCHER_TIMEOUT_SECS` | `dispatcher.timeout_secs` |
//! | `HW_DISPATCHER_DEBUG` | `dispatcher.debug` |
//! | `HW_DISPATCHER_SOURCE_URL` | `dispatcher.source_url` |
//! | `HW_DISPATCHER_SIGNATURE_ALGORITHM` | `dispatcher.signature_algorithm` |
//! | `HW_DISPATCHER_PROCESS_SALT` | `dispatcher.process_salt` |
//! | `HW_QUEUE_NAME` | `queue.name` |
//! | `HW_QUEUE_CONCURRENCY` | `queue.concurrency` |
//! | `HW_STORE_BACKEND` | `store.backend` |
//! | `HW_STORE_URL` | `store.url` |
//! | `HW_LOG_FILTER` | `logging.filter` |
//! | `HW_LOG_JSON` | `logging.json` |

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HookwireConfig {
    pub dispatcher: DispatcherSettings,
    pub queue: QueueSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
    /// Seed records loaded into the in-memory store
    pub webhooks: Vec<WebhookSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Value of the `X-Webhook-Source` header
    pub source_url: String,
    /// `sha256`, `sha384` or `sha512`
    pub signature_algorithm: String,
    /// Log full request and response detail
    pub debug: bool,
    /// Salt mixed into delivery ids. Random per process when unset.
    pub process_salt: Option<String>,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            user_agent: format!("Hookwire/{} (+webhook-delivery)", env!("CARGO_PKG_VERSION")),
            source_url: "http://localhost".to_string(),
            signature_algorithm: "sha256".to_string(),
            debug: false,
            process_salt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub name: String,
    pub concurrency: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            name: "webhooks".to_string(),
            concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub url: Option<String>,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// A webhook record as written in the config file.
///
/// `topics` accepts both flat keys and legacy `{ value = "order_created" }`
/// tables; the registry reader normalizes them on first read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSeed {
    pub id: String,
    pub delivery_url: String,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub topics: Vec<serde_json::Value>,
    #[serde(default = "default_seed_status")]
    pub status: String,
    #[serde(default)]
    pub failure_count: u32,
}

fn default_seed_status() -> String {
    "published".to_string()
}

impl HookwireConfig {
    /// Load from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                info!(path = %path.display(), "Loading configuration file");
                Self::from_toml_str(&std::fs::read_to_string(path)?)?
            }
            None => {
                debug!("No configuration file given, using defaults");
                Self::default()
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `HW_*` overrides using `lookup` to read variables
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("HW_DISPATCHER_TIMEOUT_SECS") {
            self.dispatcher.timeout_secs = parse_env("HW_DISPATCHER_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("HW_DISPATCHER_DEBUG") {
            self.dispatcher.debug = parse_env("HW_DISPATCHER_DEBUG", &v)?;
        }
        if let Some(v) = lookup("HW_DISPATCHER_SOURCE_URL") {
            self.dispatcher.source_url = v;
        }
        if let Some(v) = lookup("HW_DISPATCHER_SIGNATURE_ALGORITHM") {
            self.dispatcher.signature_algorithm = v;
        }
        if let Some(v) = lookup("HW_DISPATCHER_PROCESS_SALT") {
            self.dispatcher.process_salt = Some(v);
        }
        if let Some(v) = lookup("HW_QUEUE_NAME") {
            self.queue.name = v;
        }
        if let Some(v) = lookup("HW_QUEUE_CONCURRENCY") {
            self.queue.concurrency = parse_env("HW_QUEUE_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("HW_STORE_BACKEND") {
            self.store.backend = match v.as_str() {
                "memory" => StoreBackend::Memory,
                "postgres" => StoreBackend::Postgres,
                other => {
                    return Err(ConfigError::Invalid(format!("Unknown store backend: {}", other)))
                }
            };
        }
        if let Some(v) = lookup("HW_STORE_URL") {
            self.store.url = Some(v);
        }
        if let Some(v) = lookup("HW_LOG_FILTER") {
            self.logging.filter = v;
        }
        if let Some(v) = lookup("HW_LOG_JSON") {
            self.logging.json = parse_env("HW_LOG_JSON", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatcher.timeout_secs == 0 {
            return Err(ConfigError::Invalid("dispatcher.timeout_secs must be positive".to_string()));
        }
        if !matches!(self.dispatcher.signature_algorithm.as_str(), "sha256" | "sha384" | "sha512") {
            return Err(ConfigError::Invalid(format!(
                "Unsupported signature algorithm: {}",
                self.dispatcher.signature_algorithm
            )));
        }
        if self.queue.name.is_empty() {
            return Err(ConfigError::Invalid("queue.name must not be empty".to_string()));
        }
        if self.queue.concurrency == 0 {
            return Err(ConfigError::Invalid("queue.concurrency must be positive".to_string()));
        }
        if self.store.backend == StoreBackend::Postgres && self.store.url.is_none() {
            return Err(ConfigError::Invalid("store.url is required for the postgres backend".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} has an invalid value: {}", key, value)))
}
