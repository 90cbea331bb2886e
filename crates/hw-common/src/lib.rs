use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub mod logging;
pub mod topic;

pub use topic::{canonical_topic, Event, Resource, Topic, CATALOG_VERSION};

/// Captured payload: a JSON object with no live references
pub type Payload = serde_json::Map<String, serde_json::Value>;

// ============================================================================
// Webhook Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Published,
    Draft,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Published => "published",
            WebhookStatus::Draft => "draft",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "published" => Ok(WebhookStatus::Published),
            "draft" => Ok(WebhookStatus::Draft),
            other => Err(HookwireError::Config(format!("Unknown webhook status: {}", other))),
        }
    }
}

/// A webhook subscription with its topics normalized to catalog topics
#[derive(Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub id: String,
    pub delivery_url: String,
    /// Signing secret. Never logged.
    #[serde(skip_serializing, default)]
    pub secret: String,
    pub topics: BTreeSet<Topic>,
    pub status: WebhookStatus,
    pub failure_count: u32,
}

impl WebhookConfig {
    pub fn is_published(&self) -> bool {
        self.status == WebhookStatus::Published
    }

    pub fn subscribes_to(&self, topic: &Topic) -> bool {
        self.topics.contains(topic)
    }
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("id", &self.id)
            .field("delivery_url", &self.delivery_url)
            .field("secret", &"<redacted>")
            .field("topics", &self.topics)
            .field("status", &self.status)
            .field("failure_count", &self.failure_count)
            .finish()
    }
}

/// Generate a signing secret for webhooks created without one
pub fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(40)
        .map(char::from)
        .collect()
}

// ============================================================================
// Delivery Job
// ============================================================================

/// "Send this captured payload to this webhook for this topic"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub webhook_id: String,
    pub topic: Topic,
    pub payload: Payload,
    pub triggered_at: String,
}

impl DeliveryJob {
    pub fn new(webhook_id: impl Into<String>, topic: Topic, payload: Payload, triggered_at: DateTime<Utc>) -> Self {
        Self {
            webhook_id: webhook_id.into(),
            topic,
            payload,
            triggered_at: format_timestamp(triggered_at),
        }
    }

    /// Encode as queue task arguments
    pub fn to_task_args(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(HookwireError::Serialization("Delivery job did not encode to an object".to_string())),
        }
    }

    /// Decode from queue task arguments
    pub fn from_task_args(args: serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        Ok(serde_json::from_value(serde_json::Value::Object(args))?)
    }
}

/// RFC 3339 timestamp with second precision, e.g. `2024-05-01T10:00:00Z`
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum HookwireError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for HookwireError {
    fn from(e: serde_json::Error) -> Self {
        HookwireError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HookwireError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_webhook() -> WebhookConfig {
        WebhookConfig {
            id: "7".to_string(),
            delivery_url: "https://example.com/hook".to_string(),
            secret: "s3cr3t".to_string(),
            topics: ["order.created".parse().unwrap()].into_iter().collect(),
            status: WebhookStatus::Published,
            failure_count: 0,
        }
    }

    #[test]
    fn test_debug_redacts_secret() {
        let rendered = format!("{:?}", sample_webhook());
        assert!(!rendered.contains("s3cr3t"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_serialize_skips_secret() {
        let json = serde_json::to_string(&sample_webhook()).unwrap();
        assert!(!json.contains("s3cr3t"));
        assert!(json.contains("order.created"));
    }

    #[test]
    fn test_delivery_job_task_args() {
        let mut payload = Payload::new();
        payload.insert("id".to_string(), serde_json::json!(42));
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let job = DeliveryJob::new("7", "order.created".parse().unwrap(), payload, at);

        let args = job.to_task_args().unwrap();
        assert_eq!(args["webhook_id"], "7");
        assert_eq!(args["topic"], "order.created");
        assert_eq!(args["triggered_at"], "2024-05-01T10:00:00Z");

        let decoded = DeliveryJob::from_task_args(args).unwrap();
        assert_eq!(decoded, job);
    }

    #[test]
    fn test_generate_secret() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), 40);
        assert_ne!(a, b);
    }

    #[test]
    fn test_status_parse() {
        assert_eq!(WebhookStatus::parse("published").unwrap(), WebhookStatus::Published);
        assert_eq!(WebhookStatus::parse("draft").unwrap(), WebhookStatus::Draft);
        assert!(WebhookStatus::parse("paused").is_err());
    }
}
