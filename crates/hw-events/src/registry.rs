//! Listener / Topic Binding Registry
//!
//! Built once at bootstrap from the published webhooks and shared by `Arc`.
//! At occurrence time it captures the payload once per topic and enqueues
//! one delivery job per bound webhook. Nothing here ever fails the caller:
//! capture and enqueue problems are logged and reported.
//!
//! The bound webhook set is resolved at bootstrap. Webhooks published,
//! unpublished or edited afterwards take effect on the next bootstrap.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hw_common::{DeliveryJob, Topic, WebhookConfig, CATALOG_VERSION};
use hw_queue::DeliveryQueue;
use hw_store::RegistryReader;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::capture::OrderDetails;
use crate::entity::Occurrence;
use crate::listener::{listener_for, Listener};

/// Task name the dispatcher worker is registered under
pub const DELIVER_TASK: &str = "hookwire.deliver_webhook";

struct Binding {
    listener: Arc<dyn Listener>,
    webhook_ids: Vec<String>,
}

/// What one `publish` call did
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PublishReport {
    pub topic: Option<Topic>,
    /// Task ids of enqueued delivery jobs
    pub enqueued: Vec<String>,
    /// Webhook ids whose job could not be enqueued
    pub failed: Vec<String>,
    /// Fields omitted from the captured payload
    pub warnings: Vec<String>,
}

impl PublishReport {
    fn for_topic(topic: Option<Topic>) -> Self {
        Self {
            topic,
            ..Default::default()
        }
    }
}

pub struct ListenerRegistry {
    bindings: HashMap<Topic, Binding>,
    queue: Arc<dyn DeliveryQueue>,
    queue_name: String,
    details: Arc<dyn OrderDetails>,
}

impl ListenerRegistry {
    pub fn new(queue: Arc<dyn DeliveryQueue>, queue_name: impl Into<String>, details: Arc<dyn OrderDetails>) -> Self {
        Self {
            bindings: HashMap::new(),
            queue,
            queue_name: queue_name.into(),
            details,
        }
    }

    /// Load published webhooks and bind them
    pub async fn bootstrap(
        reader: &RegistryReader,
        queue: Arc<dyn DeliveryQueue>,
        queue_name: impl Into<String>,
        details: Arc<dyn OrderDetails>,
    ) -> hw_store::Result<Self> {
        let webhooks = reader.load_published().await?;
        let mut registry = Self::new(queue, queue_name, details);
        let bound = registry.bind(&webhooks);

        info!(
            webhooks = webhooks.len(),
            topics = registry.bindings.len(),
            new_subscriptions = bound,
            queue = %registry.queue_name,
            queue_backend = registry.queue_backend(),
            catalog_version = CATALOG_VERSION,
            "Listener registry bootstrapped"
        );
        Ok(registry)
    }

    /// Bind every published webhook to the listeners of its topics.
    ///
    /// Safe to call repeatedly: a webhook is bound to a topic at most once
    /// and drafts are skipped. Returns the number of new subscriptions.
    pub fn bind(&mut self, webhooks: &[WebhookConfig]) -> usize {
        let mut added = 0;

        for webhook in webhooks {
            if !webhook.is_published() {
                debug!(webhook_id = %webhook.id, "Skipping unpublished webhook");
                continue;
            }

            for topic in &webhook.topics {
                let details = &self.details;
                let binding = self.bindings.entry(*topic).or_insert_with(|| Binding {
                    listener: listener_for(*topic, details),
                    webhook_ids: Vec::new(),
                });

                if !binding.webhook_ids.iter().any(|id| id == &webhook.id) {
                    binding.webhook_ids.push(webhook.id.clone());
                    added += 1;
                    debug!(webhook_id = %webhook.id, topic = %topic, "Bound webhook to topic");
                }
            }
        }

        added
    }

    /// Drop all bindings, e.g. before rebinding in tests
    pub fn reset(&mut self) {
        self.bindings.clear();
    }

    pub fn is_bound(&self, topic: &Topic) -> bool {
        self.bindings.contains_key(topic)
    }

    /// Webhook ids bound to a topic, in binding order
    pub fn subscribers(&self, topic: &Topic) -> &[String] {
        self.bindings
            .get(topic)
            .map(|b| b.webhook_ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Which queue implementation jobs are recorded on
    pub fn queue_backend(&self) -> &str {
        self.queue.identifier()
    }

    pub async fn publish(&self, occurrence: &Occurrence) -> PublishReport {
        self.publish_at(occurrence, Utc::now()).await
    }

    /// Publish with an explicit trigger time
    pub async fn publish_at(&self, occurrence: &Occurrence, triggered_at: DateTime<Utc>) -> PublishReport {
        let Some(topic) = occurrence.topic() else {
            debug!(
                resource = %occurrence.resource(),
                event = %occurrence.event(),
                "Occurrence outside the topic catalog"
            );
            return PublishReport::for_topic(None);
        };

        let mut report = PublishReport::for_topic(Some(topic));

        let Some(binding) = self.bindings.get(&topic) else {
            debug!(topic = %topic, "No webhooks bound to topic");
            return report;
        };

        let captured = match binding.listener.capture(occurrence) {
            Ok(captured) => captured,
            Err(e) => {
                error!(topic = %topic, error = %e, "Failed to capture payload");
                report.failed = binding.webhook_ids.clone();
                return report;
            }
        };

        for warning in &captured.warnings {
            warn!(topic = %topic, error = %warning, "Partial payload capture");
            report.warnings.push(warning.to_string());
        }

        for webhook_id in &binding.webhook_ids {
            let job = DeliveryJob::new(webhook_id.clone(), topic, captured.payload.clone(), triggered_at);

            let args = match job.to_task_args() {
                Ok(args) => args,
                Err(e) => {
                    error!(webhook_id = %webhook_id, topic = %topic, error = %e, "Failed to encode delivery job");
                    report.failed.push(webhook_id.clone());
                    continue;
                }
            };

            match self.queue.enqueue(DELIVER_TASK, args, &self.queue_name).await {
                Ok(task_id) => {
                    debug!(
                        webhook_id = %webhook_id,
                        topic = %topic,
                        task_id = %task_id,
                        "Delivery job enqueued"
                    );
                    report.enqueued.push(task_id);
                }
                Err(e) => {
                    error!(
                        webhook_id = %webhook_id,
                        topic = %topic,
                        queue = %self.queue_name,
                        error = %e,
                        "Failed to enqueue delivery job"
                    );
                    report.failed.push(webhook_id.clone());
                }
            }
        }

        report
    }
}
