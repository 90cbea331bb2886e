//! Hookwire Webhook Store
//!
//! Persistence seam for webhook subscription records plus the registry
//! reader that turns stored records into normalized `WebhookConfig`s.
//! - `MemoryWebhookStore`: in-process store for development and tests
//! - `PostgresWebhookStore`: SQL store (feature `postgres`)

use std::fmt;

use async_trait::async_trait;
use hw_common::{generate_secret, WebhookStatus};
use hw_config::WebhookSeed;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub mod memory;
pub mod reader;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::MemoryWebhookStore;
pub use reader::{normalize_topics, NormalizedTopics, RegistryReader};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Webhook not found: {0}")]
    NotFound(String),
    #[error("Invalid record: {0}")]
    Invalid(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A webhook record exactly as persisted.
///
/// `topics` holds raw JSON entries: flat keys such as `"order_created"` or
/// legacy `{"value": "order_created"}` objects.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoredWebhook {
    pub id: String,
    pub delivery_url: String,
    pub secret: String,
    pub topics: Vec<serde_json::Value>,
    pub status: WebhookStatus,
    pub failure_count: u32,
}

impl StoredWebhook {
    /// Build a record from a config file seed, generating a secret when none is set
    pub fn from_seed(seed: WebhookSeed) -> Result<Self> {
        let status = WebhookStatus::parse(&seed.status)
            .map_err(|e| StoreError::Invalid(format!("webhook {}: {}", seed.id, e)))?;

        let secret = match seed.secret {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                info!(webhook_id = %seed.id, "Generated signing secret for webhook without one");
                generate_secret()
            }
        };

        Ok(Self {
            id: seed.id,
            delivery_url: seed.delivery_url,
            secret,
            topics: seed.topics,
            status,
            failure_count: seed.failure_count,
        })
    }
}

impl fmt::Debug for StoredWebhook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredWebhook")
            .field("id", &self.id)
            .field("delivery_url", &self.delivery_url)
            .field("secret", &"<redacted>")
            .field("topics", &self.topics)
            .field("status", &self.status)
            .field("failure_count", &self.failure_count)
            .finish()
    }
}

/// Webhook record persistence.
///
/// Counter updates must be atomic at the storage layer: concurrent
/// deliveries for the same webhook share nothing else.
#[async_trait]
pub trait WebhookStore: Send + Sync {
    /// All records regardless of status
    async fn list(&self) -> Result<Vec<StoredWebhook>>;

    async fn get(&self, id: &str) -> Result<Option<StoredWebhook>>;

    /// Replace the stored topic list with flat keys
    async fn save_topics(&self, id: &str, topics: &[String]) -> Result<()>;

    /// Increment the failure counter and return the new value
    async fn increment_failure_count(&self, id: &str) -> Result<u32>;

    async fn reset_failure_count(&self, id: &str) -> Result<()>;

    /// Store name for logging
    fn name(&self) -> &str;
}
