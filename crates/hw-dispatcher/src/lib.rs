//! Hookwire Dispatcher
//!
//! Delivers one queued delivery job:
//! - looks up the webhook's current delivery URL and secret
//! - signs the exact JSON body with the webhook secret
//! - POSTs it with the `X-Webhook-*` headers, never following redirects
//! - resets or increments the webhook's failure counter
//!
//! There is no retry here. A failed attempt is terminal; the queue's
//! at-least-once semantics are the only redelivery.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use hw_common::{DeliveryJob, Topic, WebhookConfig};
use hw_config::DispatcherSettings;
use hw_queue::{QueuedTask, TaskHandler, TaskOutcome};
use hw_store::{RegistryReader, StoreError, WebhookStore};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, USER_AGENT};
use reqwest::{redirect, Client, StatusCode, Url};
use thiserror::Error;
use tracing::{info, warn};

pub mod signature;

pub use signature::{delivery_id, generate_salt, SignatureAlgorithm};

const LOG_TARGET: &str = "webhook_delivery";

pub const HEADER_SOURCE: &str = "X-Webhook-Source";
pub const HEADER_TOPIC: &str = "X-Webhook-Topic";
pub const HEADER_RESOURCE: &str = "X-Webhook-Resource";
pub const HEADER_EVENT: &str = "X-Webhook-Event";
pub const HEADER_SIGNATURE: &str = "X-Webhook-Signature";
pub const HEADER_WEBHOOK_ID: &str = "X-Webhook-ID";
pub const HEADER_TRIGGERED_AT: &str = "X-Webhook-Triggered-At";
pub const HEADER_DELIVERY_ID: &str = "X-Webhook-Delivery-ID";

#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Missing or unusable delivery URL, or bad dispatcher settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// DNS, connect, TLS or timeout failure
    #[error("Transport error ({kind}): {message}")]
    Transport { kind: &'static str, message: String },

    /// Receiver answered outside the success range
    #[error("HTTP {status} {reason}")]
    Http { status: u16, reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DeliveryError {
    /// Whether this failure counts against the webhook
    pub fn is_counted(&self) -> bool {
        matches!(
            self,
            DeliveryError::Config(_) | DeliveryError::Transport { .. } | DeliveryError::Http { .. }
        )
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            "timeout"
        } else if e.is_connect() {
            "connect"
        } else if e.is_builder() {
            "request"
        } else if e.is_body() || e.is_decode() {
            "body"
        } else {
            "send"
        };
        DeliveryError::Transport {
            kind,
            message: error_chain(&e),
        }
    }
}

/// reqwest wraps the interesting cause (DNS, TLS, refused) a few levels down
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Dispatcher configuration
#[derive(Clone)]
pub struct DispatcherConfig {
    pub timeout: Duration,
    pub user_agent: String,
    /// Sent as `X-Webhook-Source`
    pub source_url: String,
    pub algorithm: SignatureAlgorithm,
    /// Log full request and response detail
    pub debug: bool,
    pub process_salt: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            user_agent: format!("Hookwire/{} (+webhook-delivery)", env!("CARGO_PKG_VERSION")),
            source_url: "http://localhost".to_string(),
            algorithm: SignatureAlgorithm::Sha256,
            debug: false,
            process_salt: generate_salt(),
        }
    }
}

impl DispatcherConfig {
    pub fn from_settings(settings: &DispatcherSettings) -> Result<Self, DeliveryError> {
        Ok(Self {
            timeout: Duration::from_secs(settings.timeout_secs),
            user_agent: settings.user_agent.clone(),
            source_url: settings.source_url.clone(),
            algorithm: settings.signature_algorithm.parse()?,
            debug: settings.debug,
            process_salt: settings.process_salt.clone().unwrap_or_else(generate_salt),
        })
    }
}

/// What happened to one delivery job
#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered { status: u16 },
    Failed {
        error: DeliveryError,
        /// Counter after this attempt, when accounting succeeded
        failure_count: Option<u32>,
    },
    /// Webhook no longer exists; nothing to deliver or count
    Skipped,
}

/// Record of one dispatcher invocation
#[derive(Debug)]
pub struct DeliveryAttempt {
    pub delivery_id: String,
    pub webhook_id: String,
    pub topic: Topic,
    pub duration: Duration,
    pub outcome: DeliveryOutcome,
}

impl DeliveryAttempt {
    pub fn is_delivered(&self) -> bool {
        matches!(self.outcome, DeliveryOutcome::Delivered { .. })
    }
}

/// Success is any status in [200, 303)
pub fn is_success(status: StatusCode) -> bool {
    (200..303).contains(&status.as_u16())
}

pub struct Dispatcher {
    config: DispatcherConfig,
    client: Client,
    reader: RegistryReader,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, reader: RegistryReader) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .redirect(redirect::Policy::none())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| DeliveryError::Config(format!("Failed to build HTTP client: {}", e)))?;

        info!(
            target: LOG_TARGET,
            timeout_secs = config.timeout.as_secs(),
            algorithm = %config.algorithm,
            debug = config.debug,
            "Webhook dispatcher ready"
        );

        Ok(Self { config, client, reader })
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    fn store(&self) -> &Arc<dyn WebhookStore> {
        self.reader.store()
    }

    /// Deliver one job and update the webhook's failure counter
    pub async fn dispatch(&self, job: &DeliveryJob) -> DeliveryAttempt {
        let started = Instant::now();
        let delivery_id = delivery_id(&job.webhook_id, Utc::now().timestamp(), &self.config.process_salt);

        let attempt = |outcome| DeliveryAttempt {
            delivery_id: delivery_id.clone(),
            webhook_id: job.webhook_id.clone(),
            topic: job.topic,
            duration: started.elapsed(),
            outcome,
        };

        let webhook = match self.reader.find(&job.webhook_id).await {
            Ok(Some(webhook)) => webhook,
            Ok(None) => {
                warn!(
                    target: LOG_TARGET,
                    webhook_id = %job.webhook_id,
                    topic = %job.topic,
                    delivery_id = %delivery_id,
                    "Webhook no longer exists, skipping delivery"
                );
                return attempt(DeliveryOutcome::Skipped);
            }
            Err(e) => {
                warn!(
                    target: LOG_TARGET,
                    webhook_id = %job.webhook_id,
                    error = %e,
                    "Failed to load webhook for delivery"
                );
                return attempt(DeliveryOutcome::Failed {
                    error: e.into(),
                    failure_count: None,
                });
            }
        };

        let result = self.send(job, &webhook, &delivery_id).await;
        let duration = started.elapsed();

        let outcome = match result {
            Ok(status) => {
                info!(
                    target: LOG_TARGET,
                    webhook_id = %webhook.id,
                    topic = %job.topic,
                    delivery_id = %delivery_id,
                    status = status,
                    duration_ms = duration.as_millis() as u64,
                    "Webhook delivered"
                );
                if let Err(e) = self.store().reset_failure_count(&webhook.id).await {
                    warn!(target: LOG_TARGET, webhook_id = %webhook.id, error = %e, "Failed to reset failure count");
                }
                DeliveryOutcome::Delivered { status }
            }
            Err(error) => {
                let failure_count = if error.is_counted() {
                    match self.store().increment_failure_count(&webhook.id).await {
                        Ok(count) => Some(count),
                        Err(e) => {
                            warn!(target: LOG_TARGET, webhook_id = %webhook.id, error = %e, "Failed to increment failure count");
                            None
                        }
                    }
                } else {
                    None
                };

                warn!(
                    target: LOG_TARGET,
                    webhook_id = %webhook.id,
                    topic = %job.topic,
                    delivery_id = %delivery_id,
                    error = %error,
                    failure_count = ?failure_count,
                    duration_ms = duration.as_millis() as u64,
                    "Webhook delivery failed"
                );
                DeliveryOutcome::Failed { error, failure_count }
            }
        };

        DeliveryAttempt {
            delivery_id,
            webhook_id: webhook.id,
            topic: job.topic,
            duration,
            outcome,
        }
    }

    fn build_headers(
        &self,
        job: &DeliveryJob,
        webhook: &WebhookConfig,
        signature: &str,
        delivery_id: &str,
    ) -> Result<HeaderMap, DeliveryError> {
        let value = |v: &str| {
            HeaderValue::from_str(v).map_err(|_| DeliveryError::Config(format!("Invalid header value: {}", v)))
        };

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, value(&self.config.user_agent)?);
        headers.insert(HEADER_SOURCE, value(&self.config.source_url)?);
        headers.insert(HEADER_TOPIC, value(&job.topic.to_string())?);
        headers.insert(HEADER_RESOURCE, value(job.topic.resource().as_str())?);
        headers.insert(HEADER_EVENT, value(job.topic.event().as_str())?);
        headers.insert(HEADER_SIGNATURE, value(signature)?);
        headers.insert(HEADER_WEBHOOK_ID, value(&webhook.id)?);
        headers.insert(HEADER_TRIGGERED_AT, value(&job.triggered_at)?);
        headers.insert(HEADER_DELIVERY_ID, value(delivery_id)?);
        Ok(headers)
    }

    async fn send(&self, job: &DeliveryJob, webhook: &WebhookConfig, delivery_id: &str) -> Result<u16, DeliveryError> {
        let url = parse_delivery_url(&webhook.delivery_url)?;

        let body = serde_json::to_vec(&job.payload)?;
        let signature = self.config.algorithm.sign(&body, &webhook.secret)?;
        let headers = self.build_headers(job, webhook, &signature, delivery_id)?;

        // Debug mode logs at info so it shows under the default filter
        if self.config.debug {
            let request_body = String::from_utf8_lossy(&body);
            info!(
                target: LOG_TARGET,
                delivery_id = %delivery_id,
                method = "POST",
                url = %url,
                headers = ?headers,
                body = %request_body,
                "Webhook request"
            );
        }

        let started = Instant::now();
        let response = self.client.post(url).headers(headers).body(body).send().await?;
        let status = response.status();
        let reason = status.canonical_reason().unwrap_or("").to_string();

        if self.config.debug {
            let response_headers = response.headers().clone();
            let response_body = response.text().await.unwrap_or_default();
            info!(
                target: LOG_TARGET,
                delivery_id = %delivery_id,
                status = status.as_u16(),
                message = %reason,
                headers = ?response_headers,
                body = %response_body,
                duration_ms = started.elapsed().as_millis() as u64,
                "Webhook response"
            );
        }

        if is_success(status) {
            Ok(status.as_u16())
        } else {
            Err(DeliveryError::Http {
                status: status.as_u16(),
                reason,
            })
        }
    }

    /// Send a `webhook_id=<id>` form post to check a new endpoint.
    ///
    /// Does not touch the failure counter.
    pub async fn ping(&self, webhook: &WebhookConfig) -> Result<u16, DeliveryError> {
        let url = parse_delivery_url(&webhook.delivery_url)?;

        let response = self
            .client
            .post(url)
            .form(&[("webhook_id", webhook.id.as_str())])
            .send()
            .await?;
        let status = response.status();

        info!(
            target: LOG_TARGET,
            webhook_id = %webhook.id,
            status = status.as_u16(),
            "Webhook ping"
        );

        if is_success(status) {
            Ok(status.as_u16())
        } else {
            Err(DeliveryError::Http {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("").to_string(),
            })
        }
    }
}

fn parse_delivery_url(raw: &str) -> Result<Url, DeliveryError> {
    if raw.trim().is_empty() {
        return Err(DeliveryError::Config("Delivery URL is empty".to_string()));
    }
    let url = Url::parse(raw).map_err(|e| DeliveryError::Config(format!("Invalid delivery URL {}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(DeliveryError::Config(format!("Unsupported delivery URL scheme: {}", other))),
    }
}

#[async_trait]
impl TaskHandler for Dispatcher {
    async fn handle(&self, task: &QueuedTask) -> TaskOutcome {
        let job = match DeliveryJob::from_task_args(task.args.clone()) {
            Ok(job) => job,
            Err(e) => {
                return TaskOutcome::Failed {
                    error: format!("Malformed delivery job: {}", e),
                }
            }
        };

        let attempt = self.dispatch(&job).await;
        match attempt.outcome {
            DeliveryOutcome::Delivered { .. } | DeliveryOutcome::Skipped => TaskOutcome::Completed,
            DeliveryOutcome::Failed { error, .. } => TaskOutcome::Failed {
                error: error.to_string(),
            },
        }
    }
}
