//! Pipeline Tests
//!
//! Occurrence in, signed POST out: listener registry, in-memory queue,
//! queue worker and dispatcher wired the way the dev server wires them.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use hw_common::WebhookStatus;
use hw_dispatcher::{Dispatcher, DispatcherConfig, SignatureAlgorithm, HEADER_SIGNATURE, HEADER_TOPIC, HEADER_WEBHOOK_ID};
use hw_events::{
    Address, Coupon, Entity, LineItem, ListenerRegistry, NoOrderDetails, Occurrence, Order, OrderTotals,
    PublishReport, DELIVER_TASK,
};
use hw_queue::{MemoryDeliveryQueue, QueueWorker};
use hw_store::{MemoryWebhookStore, RegistryReader, StoredWebhook, WebhookStore};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const QUEUE: &str = "webhooks";

fn stored(id: &str, delivery_url: String, topic: &str) -> StoredWebhook {
    StoredWebhook {
        id: id.to_string(),
        delivery_url,
        secret: format!("whsec_{}", id),
        topics: vec![json!(topic)],
        status: WebhookStatus::Published,
        failure_count: 0,
    }
}

fn order() -> Order {
    Order {
        id: 1001,
        number: "1001".to_string(),
        status: "processing".to_string(),
        currency: "EUR".to_string(),
        customer_id: Some(5),
        billing: Address {
            first_name: "Ada".to_string(),
            email: Some("ada@example.com".to_string()),
            ..Default::default()
        },
        shipping: Address::default(),
        payment_method: "card".to_string(),
        line_items: vec![LineItem {
            id: 11,
            product_id: 3,
            name: "Fountain pen".to_string(),
            sku: Some("PEN-1".to_string()),
            quantity: 2,
            subtotal: "40.00".to_string(),
            total: "40.00".to_string(),
        }],
        totals: OrderTotals {
            subtotal: "40.00".to_string(),
            discount_total: "0.00".to_string(),
            shipping_total: "5.00".to_string(),
            tax_total: "0.00".to_string(),
            total: "45.00".to_string(),
        },
        date_created: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
        date_modified: None,
        date_paid: None,
    }
}

fn coupon() -> Coupon {
    Coupon {
        id: 77,
        code: "SPRING10".to_string(),
        discount_type: "percent".to_string(),
        amount: "10".to_string(),
        description: String::new(),
        usage_count: 4,
        usage_limit: Some(100),
        individual_use: false,
        product_ids: vec![3],
        minimum_amount: None,
        maximum_amount: None,
        expires_at: None,
        date_created: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        date_modified: Some(Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap()),
    }
}

/// Bootstrap the registry over `records`, publish one occurrence and run
/// the worker until every queued job has been delivered.
async fn publish_and_deliver(records: Vec<StoredWebhook>, occurrence: Occurrence) -> PublishReport {
    let store: Arc<dyn WebhookStore> = Arc::new(MemoryWebhookStore::with_records(records));
    let reader = RegistryReader::new(store);

    let queue = Arc::new(MemoryDeliveryQueue::new());
    let receiver = queue.take_receiver(QUEUE).unwrap();
    let registry = ListenerRegistry::bootstrap(&reader, queue.clone(), QUEUE, Arc::new(NoOrderDetails))
        .await
        .unwrap();

    let config = DispatcherConfig {
        source_url: "https://shop.example.com".to_string(),
        ..Default::default()
    };
    let dispatcher = Arc::new(Dispatcher::new(config, reader).unwrap());
    let worker = QueueWorker::new(QUEUE, 2).register(DELIVER_TASK, dispatcher);

    let report = registry.publish(&occurrence).await;

    // Closing every sender lets the worker drain the channel and stop
    drop(registry);
    drop(queue);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    worker.run(receiver, shutdown_rx).await;

    report
}

fn header<'a>(request: &'a Request, name: &str) -> &'a str {
    request
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_order_created_reaches_subscribed_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let records = vec![
        stored("7", format!("{}/orders", server.uri()), "order_created"),
        stored("8", format!("{}/products", server.uri()), "product_created"),
    ];
    let report = publish_and_deliver(records, Occurrence::created(Entity::Order(order()))).await;

    assert_eq!(report.enqueued.len(), 1);
    assert!(report.failed.is_empty());

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];

    assert_eq!(header(request, HEADER_TOPIC), "order.created");
    assert_eq!(header(request, HEADER_WEBHOOK_ID), "7");
    assert!(SignatureAlgorithm::Sha256.verify(&request.body, "whsec_7", header(request, HEADER_SIGNATURE)));

    let body: Value = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(body["id"], 1001);
    assert_eq!(body["status"], "processing");
    assert_eq!(body["totals"]["total"], "45.00");
    assert_eq!(body["line_items"][0]["sku"], "PEN-1");
}

#[tokio::test]
async fn test_coupon_updated_fans_out_identical_payloads() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&server)
        .await;

    let records = vec![
        stored("1", format!("{}/first", server.uri()), "coupon_updated"),
        stored("2", format!("{}/second", server.uri()), "coupon_updated"),
    ];
    let report = publish_and_deliver(records, Occurrence::updated(Entity::Coupon(coupon()))).await;

    assert_eq!(report.enqueued.len(), 2);

    let mut requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    requests.sort_by(|a, b| a.url.path().cmp(b.url.path()));

    assert_eq!(requests[0].url.path(), "/first");
    assert_eq!(requests[1].url.path(), "/second");
    assert_eq!(requests[0].body, requests[1].body);

    for (request, secret) in requests.iter().zip(["whsec_1", "whsec_2"]) {
        assert_eq!(header(request, HEADER_TOPIC), "coupon.updated");
        assert!(SignatureAlgorithm::Sha256.verify(&request.body, secret, header(request, HEADER_SIGNATURE)));
    }

    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["code"], "SPRING10");
    assert_eq!(body["usage_count"], 4);
}
