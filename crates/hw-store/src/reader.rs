//! Webhook Registry Reader
//!
//! Loads webhook records at bootstrap and normalizes their topic lists.
//! Legacy records store topics as `{"value": "order_created"}` objects; the
//! first read flattens and deduplicates them and writes the flat form back.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use hw_common::{Topic, WebhookConfig};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{Result, StoredWebhook, WebhookStore};

/// Flat topic keys plus whether the stored form needs rewriting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedTopics {
    pub keys: Vec<String>,
    pub changed: bool,
}

/// Flatten and deduplicate raw stored topic entries, keeping first-seen order.
///
/// Entries that are neither strings nor `{"value": <string>}` objects are
/// dropped. Any flattening, trimming, dropping or deduplication marks the
/// result as changed.
pub fn normalize_topics(raw: &[Value]) -> NormalizedTopics {
    let mut keys = Vec::with_capacity(raw.len());
    let mut seen = HashSet::new();
    let mut changed = false;

    for entry in raw {
        let key = match entry {
            Value::String(s) => {
                if s.trim() != s {
                    changed = true;
                }
                s.trim()
            }
            Value::Object(map) => {
                changed = true;
                match map.get("value").and_then(Value::as_str) {
                    Some(s) => s.trim(),
                    None => continue,
                }
            }
            _ => {
                changed = true;
                continue;
            }
        };

        if key.is_empty() {
            changed = true;
            continue;
        }

        if seen.insert(key.to_string()) {
            keys.push(key.to_string());
        } else {
            changed = true;
        }
    }

    NormalizedTopics { keys, changed }
}

/// Map flat keys onto catalog topics, ignoring unknown ones
fn catalog_topics(webhook_id: &str, keys: &[String]) -> BTreeSet<Topic> {
    keys.iter()
        .filter_map(|key| {
            let topic = Topic::from_flat_key(key);
            if topic.is_none() {
                debug!(webhook_id = %webhook_id, topic = %key, "Ignoring topic outside the catalog");
            }
            topic
        })
        .collect()
}

fn to_config(stored: StoredWebhook, keys: &[String]) -> WebhookConfig {
    let topics = catalog_topics(&stored.id, keys);
    WebhookConfig {
        id: stored.id,
        delivery_url: stored.delivery_url,
        secret: stored.secret,
        topics,
        status: stored.status,
        failure_count: stored.failure_count,
    }
}

/// Reads webhook records for the listener registry and dispatcher
#[derive(Clone)]
pub struct RegistryReader {
    store: Arc<dyn WebhookStore>,
}

impl RegistryReader {
    pub fn new(store: Arc<dyn WebhookStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn WebhookStore> {
        &self.store
    }

    /// List published webhooks with normalized topics.
    ///
    /// Records whose stored topics needed normalization are rewritten in
    /// flat form. A failed rewrite is logged and the normalized view is
    /// still returned.
    pub async fn load_published(&self) -> Result<Vec<WebhookConfig>> {
        let records = self.store.list().await?;
        let total = records.len();
        let mut published = Vec::new();

        for record in records {
            let normalized = normalize_topics(&record.topics);

            if normalized.changed {
                let before = Value::Array(record.topics.clone());
                match self.store.save_topics(&record.id, &normalized.keys).await {
                    Ok(()) => info!(
                        webhook_id = %record.id,
                        before = %before,
                        after = ?normalized.keys,
                        "Migrated legacy webhook topic entries to flat form"
                    ),
                    Err(e) => warn!(
                        webhook_id = %record.id,
                        error = %e,
                        "Failed to persist normalized webhook topics"
                    ),
                }
            }

            let config = to_config(record, &normalized.keys);
            if config.is_published() {
                published.push(config);
            }
        }

        info!(
            store = %self.store.name(),
            total = total,
            published = published.len(),
            "Loaded webhook registry"
        );

        Ok(published)
    }

    /// Normalized view of one record, without persisting any migration
    pub async fn find(&self, id: &str) -> Result<Option<WebhookConfig>> {
        Ok(self.store.get(id).await?.map(|record| {
            let normalized = normalize_topics(&record.topics);
            to_config(record, &normalized.keys)
        }))
    }
}
