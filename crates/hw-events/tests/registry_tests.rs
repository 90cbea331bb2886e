//! Listener Registry Tests
//!
//! Tests for:
//! - One delivery job per published, subscribed webhook
//! - Idempotent binding
//! - Enqueue failures staying inside the registry
//! - Bootstrap from the registry reader

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use hw_common::{DeliveryJob, Topic, WebhookConfig, WebhookStatus};
use hw_events::{
    Entity, ListenerRegistry, NoOrderDetails, Occurrence, Order, OrderDetails, OrderTotals, Product, DELIVER_TASK,
};
use hw_queue::{DeliveryQueue, QueueError, TaskArgs};
use hw_store::{MemoryWebhookStore, RegistryReader, StoredWebhook};
use parking_lot::Mutex;
use serde_json::json;

/// Records enqueued tasks; optionally refuses them
#[derive(Default)]
struct RecordingQueue {
    tasks: Mutex<Vec<(String, TaskArgs, String)>>,
    reject: bool,
}

impl RecordingQueue {
    fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    fn jobs(&self) -> Vec<DeliveryJob> {
        self.tasks
            .lock()
            .iter()
            .map(|(_, args, _)| DeliveryJob::from_task_args(args.clone()).unwrap())
            .collect()
    }
}

#[async_trait]
impl DeliveryQueue for RecordingQueue {
    fn identifier(&self) -> &str {
        "recording"
    }

    async fn enqueue(&self, task_name: &str, args: TaskArgs, queue_name: &str) -> hw_queue::Result<String> {
        if self.reject {
            return Err(QueueError::Enqueue("queue store unavailable".to_string()));
        }
        let mut tasks = self.tasks.lock();
        tasks.push((task_name.to_string(), args, queue_name.to_string()));
        Ok(format!("task-{}", tasks.len()))
    }
}

fn topic(s: &str) -> Topic {
    s.parse().unwrap()
}

fn webhook(id: &str, topics: &[&str], status: WebhookStatus) -> WebhookConfig {
    WebhookConfig {
        id: id.to_string(),
        delivery_url: format!("https://receiver.example.com/{}", id),
        secret: format!("secret-{}", id),
        topics: topics.iter().map(|t| topic(t)).collect(),
        status,
        failure_count: 0,
    }
}

fn details() -> Arc<dyn OrderDetails> {
    Arc::new(NoOrderDetails)
}

fn order(id: u64) -> Order {
    Order {
        id,
        number: id.to_string(),
        status: "processing".to_string(),
        currency: "EUR".to_string(),
        customer_id: None,
        billing: Default::default(),
        shipping: Default::default(),
        payment_method: "card".to_string(),
        line_items: Vec::new(),
        totals: OrderTotals {
            total: "45.00".to_string(),
            ..Default::default()
        },
        date_created: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        date_modified: None,
        date_paid: None,
    }
}

fn product(id: u64) -> Product {
    Product {
        id,
        name: "Notebook".to_string(),
        slug: "notebook".to_string(),
        sku: None,
        product_type: "simple".to_string(),
        status: "publish".to_string(),
        regular_price: "8.00".to_string(),
        sale_price: None,
        stock_quantity: Some(12),
        categories: Vec::new(),
        tags: Vec::new(),
        attributes: BTreeMap::new(),
        permalink: None,
        date_created: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        date_modified: None,
    }
}

#[tokio::test]
async fn test_order_created_enqueues_one_job() {
    let queue = Arc::new(RecordingQueue::default());
    let mut registry = ListenerRegistry::new(queue.clone(), "webhooks", details());
    registry.bind(&[webhook("7", &["order.created"], WebhookStatus::Published)]);

    let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    let report = registry
        .publish_at(&Occurrence::created(Entity::Order(order(42))), at)
        .await;

    assert_eq!(report.topic, Some(topic("order.created")));
    assert_eq!(report.enqueued, vec!["task-1".to_string()]);
    assert!(report.failed.is_empty());

    let tasks = queue.tasks.lock().clone();
    assert_eq!(tasks[0].0, DELIVER_TASK);
    assert_eq!(tasks[0].2, "webhooks");

    let jobs = queue.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].webhook_id, "7");
    assert_eq!(jobs[0].topic, topic("order.created"));
    assert_eq!(jobs[0].payload["id"], 42);
    assert_eq!(jobs[0].payload["status"], "processing");
    assert_eq!(jobs[0].payload["totals"]["total"], "45.00");
    assert_eq!(jobs[0].triggered_at, "2024-05-01T10:00:00Z");
}

#[tokio::test]
async fn test_two_subscribers_get_identical_payloads() {
    let queue = Arc::new(RecordingQueue::default());
    let mut registry = ListenerRegistry::new(queue.clone(), "webhooks", details());
    registry.bind(&[
        webhook("1", &["product.updated"], WebhookStatus::Published),
        webhook("2", &["product.updated", "product.deleted"], WebhookStatus::Published),
    ]);

    let report = registry
        .publish(&Occurrence::updated(Entity::Product(product(3))))
        .await;
    assert_eq!(report.enqueued.len(), 2);

    let jobs = queue.jobs();
    let ids: Vec<&str> = jobs.iter().map(|j| j.webhook_id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2"]);
    assert_eq!(jobs[0].payload, jobs[1].payload);
}

#[tokio::test]
async fn test_drafts_and_unsubscribed_receive_nothing() {
    let queue = Arc::new(RecordingQueue::default());
    let mut registry = ListenerRegistry::new(queue.clone(), "webhooks", details());
    registry.bind(&[
        webhook("1", &["order.created"], WebhookStatus::Draft),
        webhook("2", &["order.updated"], WebhookStatus::Published),
    ]);

    assert!(!registry.is_bound(&topic("order.created")));
    let report = registry
        .publish(&Occurrence::created(Entity::Order(order(1))))
        .await;

    assert!(report.enqueued.is_empty());
    assert!(queue.jobs().is_empty());
}

#[tokio::test]
async fn test_bind_twice_does_not_duplicate() {
    let queue = Arc::new(RecordingQueue::default());
    let mut registry = ListenerRegistry::new(queue.clone(), "webhooks", details());
    let webhooks = vec![webhook("7", &["order.created", "order.updated"], WebhookStatus::Published)];

    assert_eq!(registry.bind(&webhooks), 2);
    assert_eq!(registry.bind(&webhooks), 0);
    assert_eq!(registry.subscribers(&topic("order.created")), ["7".to_string()]);

    registry
        .publish(&Occurrence::created(Entity::Order(order(1))))
        .await;
    assert_eq!(queue.jobs().len(), 1);
}

#[tokio::test]
async fn test_reset_then_rebind() {
    let queue = Arc::new(RecordingQueue::default());
    let mut registry = ListenerRegistry::new(queue, "webhooks", details());
    registry.bind(&[webhook("7", &["coupon.created"], WebhookStatus::Published)]);
    assert!(registry.is_bound(&topic("coupon.created")));

    registry.reset();
    assert!(!registry.is_bound(&topic("coupon.created")));

    registry.bind(&[webhook("8", &["coupon.deleted"], WebhookStatus::Published)]);
    assert!(registry.is_bound(&topic("coupon.deleted")));
    assert!(registry.subscribers(&topic("coupon.created")).is_empty());
}

#[tokio::test]
async fn test_enqueue_failure_is_reported_not_raised() {
    let queue = Arc::new(RecordingQueue::rejecting());
    let mut registry = ListenerRegistry::new(queue, "webhooks", details());
    registry.bind(&[webhook("7", &["order.created"], WebhookStatus::Published)]);

    let report = registry
        .publish(&Occurrence::created(Entity::Order(order(1))))
        .await;
    assert!(report.enqueued.is_empty());
    assert_eq!(report.failed, vec!["7".to_string()]);
}

#[tokio::test]
async fn test_deleted_occurrence_carries_snapshot() {
    let queue = Arc::new(RecordingQueue::default());
    let mut registry = ListenerRegistry::new(queue.clone(), "webhooks", details());
    registry.bind(&[webhook("7", &["product.deleted"], WebhookStatus::Published)]);

    registry
        .publish(&Occurrence::deleted(3, Entity::Product(product(3))))
        .await;

    let jobs = queue.jobs();
    assert_eq!(jobs[0].payload["id"], 3);
    assert_eq!(jobs[0].payload["deleted"], true);
    assert_eq!(jobs[0].payload["name"], "Notebook");
}

#[tokio::test]
async fn test_bootstrap_binds_published_and_migrates_legacy_topics() {
    let store = Arc::new(MemoryWebhookStore::with_records(vec![
        StoredWebhook {
            id: "7".to_string(),
            delivery_url: "https://receiver.example.com/7".to_string(),
            secret: "s".to_string(),
            topics: vec![json!({"value": "order_created"})],
            status: WebhookStatus::Published,
            failure_count: 0,
        },
        StoredWebhook {
            id: "8".to_string(),
            delivery_url: "https://receiver.example.com/8".to_string(),
            secret: "s".to_string(),
            topics: vec![json!("order_created")],
            status: WebhookStatus::Draft,
            failure_count: 0,
        },
    ]));
    let reader = RegistryReader::new(store.clone());
    let queue = Arc::new(RecordingQueue::default());

    let registry = ListenerRegistry::bootstrap(&reader, queue, "webhooks", details())
        .await
        .unwrap();

    assert_eq!(registry.subscribers(&topic("order.created")), ["7".to_string()]);
    assert_eq!(registry.queue_name(), "webhooks");
    assert_eq!(registry.queue_backend(), "recording");
    assert_eq!(store.topic_save_count(), 1);
}
