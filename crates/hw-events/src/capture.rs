//! Payload Capturer
//!
//! Pure functions from an entity to a JSON-safe payload. Captures run inside
//! the request that raised the occurrence, so they do no network or delivery
//! I/O. Payloads are self-contained values: a receiver never needs to fetch
//! anything else to make sense of them.
//!
//! Keys are emitted in sorted order, so capturing an unchanged entity twice
//! produces byte-identical JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hw_common::{format_timestamp, Payload, Resource};
use serde_json::{json, Value};
use thiserror::Error;

use crate::entity::{Address, Coupon, Customer, Entity, LineItem, MetaEntry, Occurrence, Order, Product, Refund};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    /// Raised by sub-aggregate sources
    #[error("Sub-aggregate unavailable: {0}")]
    Unavailable(String),

    /// A sub-aggregate failed to load and its field was omitted
    #[error("Partial capture of {resource} {id}: {field} omitted ({reason})")]
    PartialCapture {
        resource: Resource,
        id: u64,
        field: &'static str,
        reason: String,
    },

    #[error("Listener for {expected} received a {actual} occurrence")]
    KindMismatch { expected: String, actual: String },
}

/// A captured payload plus any fields that had to be omitted
#[derive(Debug, Clone, PartialEq)]
pub struct Captured {
    pub payload: Payload,
    pub warnings: Vec<CaptureError>,
}

impl Captured {
    fn complete(payload: Payload) -> Self {
        Self {
            payload,
            warnings: Vec::new(),
        }
    }
}

/// Source of optional order sub-aggregates.
///
/// Implementations read from local storage only. A failure omits the field
/// from the payload; it never fails the capture.
pub trait OrderDetails: Send + Sync {
    /// Metadata per line item id
    fn line_item_meta(&self, order_id: u64) -> Result<BTreeMap<u64, Vec<MetaEntry>>, CaptureError>;

    fn refunds(&self, order_id: u64) -> Result<Vec<Refund>, CaptureError>;
}

/// Details source for hosts that keep no sub-aggregates
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOrderDetails;

impl OrderDetails for NoOrderDetails {
    fn line_item_meta(&self, _order_id: u64) -> Result<BTreeMap<u64, Vec<MetaEntry>>, CaptureError> {
        Ok(BTreeMap::new())
    }

    fn refunds(&self, _order_id: u64) -> Result<Vec<Refund>, CaptureError> {
        Ok(Vec::new())
    }
}

fn timestamp(at: &DateTime<Utc>) -> Value {
    Value::String(format_timestamp(*at))
}

fn optional_timestamp(at: &Option<DateTime<Utc>>) -> Value {
    at.as_ref().map(timestamp).unwrap_or(Value::Null)
}

fn into_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

fn address(address: &Address) -> Value {
    json!({
        "first_name": address.first_name,
        "last_name": address.last_name,
        "company": address.company,
        "address_1": address.address_1,
        "address_2": address.address_2,
        "city": address.city,
        "state": address.state,
        "postcode": address.postcode,
        "country": address.country,
        "email": address.email,
        "phone": address.phone,
    })
}

pub fn capture_product(product: &Product) -> Payload {
    let on_sale = product.sale_price.as_deref().is_some_and(|p| !p.is_empty());
    let price = match (&product.sale_price, on_sale) {
        (Some(sale), true) => sale.clone(),
        _ => product.regular_price.clone(),
    };

    into_payload(json!({
        "id": product.id,
        "name": product.name,
        "slug": product.slug,
        "sku": product.sku,
        "type": product.product_type,
        "status": product.status,
        "price": price,
        "regular_price": product.regular_price,
        "sale_price": product.sale_price,
        "on_sale": on_sale,
        "stock_quantity": product.stock_quantity,
        "in_stock": product.stock_quantity.map_or(true, |q| q > 0),
        "categories": product.categories,
        "tags": product.tags,
        "attributes": product.attributes,
        "permalink": product.permalink,
        "date_created": timestamp(&product.date_created),
        "date_modified": optional_timestamp(&product.date_modified),
    }))
}

pub fn capture_coupon(coupon: &Coupon) -> Payload {
    into_payload(json!({
        "id": coupon.id,
        "code": coupon.code,
        "discount_type": coupon.discount_type,
        "amount": coupon.amount,
        "description": coupon.description,
        "usage_count": coupon.usage_count,
        "usage_limit": coupon.usage_limit,
        "individual_use": coupon.individual_use,
        "product_ids": coupon.product_ids,
        "minimum_amount": coupon.minimum_amount,
        "maximum_amount": coupon.maximum_amount,
        "date_expires": optional_timestamp(&coupon.expires_at),
        "date_created": timestamp(&coupon.date_created),
        "date_modified": optional_timestamp(&coupon.date_modified),
    }))
}

pub fn capture_customer(customer: &Customer) -> Payload {
    into_payload(json!({
        "id": customer.id,
        "email": customer.email,
        "first_name": customer.first_name,
        "last_name": customer.last_name,
        "username": customer.username,
        "role": customer.role,
        "billing": address(&customer.billing),
        "shipping": address(&customer.shipping),
        "is_paying_customer": customer.is_paying_customer,
        "orders_count": customer.orders_count,
        "total_spent": customer.total_spent,
        "date_created": timestamp(&customer.date_created),
        "date_modified": optional_timestamp(&customer.date_modified),
    }))
}

fn line_item(item: &LineItem, meta: Option<&BTreeMap<u64, Vec<MetaEntry>>>) -> Value {
    let mut value = json!({
        "id": item.id,
        "product_id": item.product_id,
        "name": item.name,
        "sku": item.sku,
        "quantity": item.quantity,
        "subtotal": item.subtotal,
        "total": item.total,
    });

    if let (Some(meta), Value::Object(map)) = (meta, &mut value) {
        let entries: Vec<Value> = meta
            .get(&item.id)
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| json!({ "key": e.key, "value": e.value }))
                    .collect()
            })
            .unwrap_or_default();
        map.insert("meta_data".to_string(), Value::Array(entries));
    }

    value
}

/// Capture an order. Line-item metadata and refunds are optional: when
/// their source fails, the field is left out and a warning recorded.
pub fn capture_order(order: &Order, details: &dyn OrderDetails) -> Captured {
    let mut warnings = Vec::new();

    let meta = match details.line_item_meta(order.id) {
        Ok(meta) => Some(meta),
        Err(e) => {
            warnings.push(CaptureError::PartialCapture {
                resource: Resource::Order,
                id: order.id,
                field: "line_items.meta_data",
                reason: e.to_string(),
            });
            None
        }
    };

    let line_items: Vec<Value> = order
        .line_items
        .iter()
        .map(|item| line_item(item, meta.as_ref()))
        .collect();

    let mut payload = into_payload(json!({
        "id": order.id,
        "number": order.number,
        "status": order.status,
        "currency": order.currency,
        "customer_id": order.customer_id,
        "billing": address(&order.billing),
        "shipping": address(&order.shipping),
        "payment_method": order.payment_method,
        "line_items": line_items,
        "totals": {
            "subtotal": order.totals.subtotal,
            "discount_total": order.totals.discount_total,
            "shipping_total": order.totals.shipping_total,
            "tax_total": order.totals.tax_total,
            "total": order.totals.total,
        },
        "date_created": timestamp(&order.date_created),
        "date_modified": optional_timestamp(&order.date_modified),
        "date_paid": optional_timestamp(&order.date_paid),
    }));

    match details.refunds(order.id) {
        Ok(refunds) => {
            let refunds: Vec<Value> = refunds
                .iter()
                .map(|r| json!({ "id": r.id, "amount": r.amount, "reason": r.reason }))
                .collect();
            payload.insert("refunds".to_string(), Value::Array(refunds));
        }
        Err(e) => warnings.push(CaptureError::PartialCapture {
            resource: Resource::Order,
            id: order.id,
            field: "refunds",
            reason: e.to_string(),
        }),
    }

    Captured { payload, warnings }
}

pub fn capture_entity(entity: &Entity, details: &dyn OrderDetails) -> Captured {
    match entity {
        Entity::Product(p) => Captured::complete(capture_product(p)),
        Entity::Coupon(c) => Captured::complete(capture_coupon(c)),
        Entity::Customer(c) => Captured::complete(capture_customer(c)),
        Entity::Order(o) => capture_order(o, details),
    }
}

/// Merge a pre-deletion snapshot with the final identifier
pub fn capture_deleted(id: u64, snapshot: &Entity, details: &dyn OrderDetails) -> Captured {
    let mut captured = capture_entity(snapshot, details);
    captured.payload.insert("id".to_string(), json!(id));
    captured.payload.insert("deleted".to_string(), Value::Bool(true));
    captured
}

pub fn capture_occurrence(occurrence: &Occurrence, details: &dyn OrderDetails) -> Captured {
    match occurrence {
        Occurrence::Deleted { id, snapshot } => capture_deleted(*id, snapshot, details),
        other => capture_entity(other.entity(), details),
    }
}
