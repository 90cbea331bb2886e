//! In-memory webhook store

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::{Result, StoreError, StoredWebhook, WebhookStore};

/// DashMap-backed store. Counter updates hold the entry's shard lock, so
/// increments and resets are atomic per webhook.
#[derive(Default)]
pub struct MemoryWebhookStore {
    records: DashMap<String, StoredWebhook>,
    /// Insertion order, so `list` is stable
    order: RwLock<Vec<String>>,
    topic_saves: AtomicUsize,
}

impl MemoryWebhookStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = StoredWebhook>) -> Self {
        let store = Self::new();
        for record in records {
            store.upsert(record);
        }
        store
    }

    /// Insert or replace a record
    pub fn upsert(&self, record: StoredWebhook) {
        let id = record.id.clone();
        if self.records.insert(id.clone(), record).is_none() {
            self.order.write().push(id);
        }
    }

    /// Number of `save_topics` calls so far
    pub fn topic_save_count(&self) -> usize {
        self.topic_saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebhookStore for MemoryWebhookStore {
    async fn list(&self) -> Result<Vec<StoredWebhook>> {
        let order = self.order.read();
        Ok(order
            .iter()
            .filter_map(|id| self.records.get(id).map(|r| r.value().clone()))
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Option<StoredWebhook>> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn save_topics(&self, id: &str, topics: &[String]) -> Result<()> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.topics = topics
            .iter()
            .map(|t| serde_json::Value::String(t.clone()))
            .collect();
        self.topic_saves.fetch_add(1, Ordering::SeqCst);
        debug!(webhook_id = %id, topics = ?topics, "Saved webhook topics");
        Ok(())
    }

    async fn increment_failure_count(&self, id: &str) -> Result<u32> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.failure_count = record.failure_count.saturating_add(1);
        Ok(record.failure_count)
    }

    async fn reset_failure_count(&self, id: &str) -> Result<()> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        record.failure_count = 0;
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hw_common::WebhookStatus;
    use std::sync::Arc;

    fn record(id: &str) -> StoredWebhook {
        StoredWebhook {
            id: id.to_string(),
            delivery_url: format!("https://example.com/{}", id),
            secret: "secret".to_string(),
            topics: vec![serde_json::json!("order_created")],
            status: WebhookStatus::Published,
            failure_count: 0,
        }
    }

    #[tokio::test]
    async fn test_list_preserves_insertion_order() {
        let store = MemoryWebhookStore::with_records(vec![record("b"), record("a"), record("c")]);
        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_without_duplicating() {
        let store = MemoryWebhookStore::new();
        store.upsert(record("a"));
        let mut updated = record("a");
        updated.delivery_url = "https://other.example.com".to_string();
        store.upsert(updated);

        let all = store.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].delivery_url, "https://other.example.com");
    }

    #[tokio::test]
    async fn test_failure_counter() {
        let store = MemoryWebhookStore::with_records(vec![record("a")]);
        assert_eq!(store.increment_failure_count("a").await.unwrap(), 1);
        assert_eq!(store.increment_failure_count("a").await.unwrap(), 2);
        store.reset_failure_count("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().unwrap().failure_count, 0);
    }

    #[tokio::test]
    async fn test_missing_record() {
        let store = MemoryWebhookStore::new();
        assert!(store.get("missing").await.unwrap().is_none());
        assert!(matches!(
            store.increment_failure_count("missing").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_atomic() {
        let store = Arc::new(MemoryWebhookStore::with_records(vec![record("a")]));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.increment_failure_count("a").await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.get("a").await.unwrap().unwrap().failure_count, 50);
    }
}
