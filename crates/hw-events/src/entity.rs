//! Domain entities as the domain layer hands them over, and the occurrences
//! that carry them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hw_common::{Event, Resource, Topic};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Address {
    pub first_name: String,
    pub last_name: String,
    pub company: String,
    pub address_1: String,
    pub address_2: String,
    pub city: String,
    pub state: String,
    pub postcode: String,
    pub country: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: u64,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default = "default_product_type")]
    pub product_type: String,
    pub status: String,
    pub regular_price: String,
    #[serde(default)]
    pub sale_price: Option<String>,
    #[serde(default)]
    pub stock_quantity: Option<i64>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub permalink: Option<String>,
    pub date_created: DateTime<Utc>,
    #[serde(default)]
    pub date_modified: Option<DateTime<Utc>>,
}

fn default_product_type() -> String {
    "simple".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: u64,
    pub code: String,
    pub discount_type: String,
    pub amount: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub usage_count: u32,
    #[serde(default)]
    pub usage_limit: Option<u32>,
    #[serde(default)]
    pub individual_use: bool,
    #[serde(default)]
    pub product_ids: Vec<u64>,
    #[serde(default)]
    pub minimum_amount: Option<String>,
    #[serde(default)]
    pub maximum_amount: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub date_created: DateTime<Utc>,
    #[serde(default)]
    pub date_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: u64,
    pub product_id: u64,
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    pub quantity: u32,
    pub subtotal: String,
    pub total: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderTotals {
    pub subtotal: String,
    pub discount_total: String,
    pub shipping_total: String,
    pub tax_total: String,
    pub total: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub number: String,
    pub status: String,
    pub currency: String,
    #[serde(default)]
    pub customer_id: Option<u64>,
    #[serde(default)]
    pub billing: Address,
    #[serde(default)]
    pub shipping: Address,
    #[serde(default)]
    pub payment_method: String,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    pub totals: OrderTotals,
    pub date_created: DateTime<Utc>,
    #[serde(default)]
    pub date_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_paid: Option<DateTime<Utc>>,
}

/// Refund recorded against an order; loaded separately from the order row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub id: u64,
    pub amount: String,
    #[serde(default)]
    pub reason: String,
}

/// Key/value metadata attached to a line item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: u64,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub username: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub billing: Address,
    #[serde(default)]
    pub shipping: Address,
    #[serde(default)]
    pub is_paying_customer: bool,
    #[serde(default)]
    pub orders_count: u32,
    #[serde(default)]
    pub total_spent: String,
    pub date_created: DateTime<Utc>,
    #[serde(default)]
    pub date_modified: Option<DateTime<Utc>>,
}

fn default_role() -> String {
    "customer".to_string()
}

/// Any entity that can raise an occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Entity {
    Product(Product),
    Coupon(Coupon),
    Order(Order),
    Customer(Customer),
}

impl Entity {
    pub fn resource(&self) -> Resource {
        match self {
            Entity::Product(_) => Resource::Product,
            Entity::Coupon(_) => Resource::Coupon,
            Entity::Order(_) => Resource::Order,
            Entity::Customer(_) => Resource::Customer,
        }
    }

    pub fn id(&self) -> u64 {
        match self {
            Entity::Product(p) => p.id,
            Entity::Coupon(c) => c.id,
            Entity::Order(o) => o.id,
            Entity::Customer(c) => c.id,
        }
    }
}

/// A domain occurrence.
///
/// Deletions carry the final id plus a snapshot taken before removal,
/// because the entity is already gone from primary storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Occurrence {
    Created { entity: Entity },
    Updated { entity: Entity },
    Restored { entity: Entity },
    Deleted { id: u64, snapshot: Entity },
}

impl Occurrence {
    pub fn created(entity: Entity) -> Self {
        Occurrence::Created { entity }
    }

    pub fn updated(entity: Entity) -> Self {
        Occurrence::Updated { entity }
    }

    pub fn restored(entity: Entity) -> Self {
        Occurrence::Restored { entity }
    }

    pub fn deleted(id: u64, snapshot: Entity) -> Self {
        Occurrence::Deleted { id, snapshot }
    }

    /// The live entity or last-known snapshot
    pub fn entity(&self) -> &Entity {
        match self {
            Occurrence::Created { entity }
            | Occurrence::Updated { entity }
            | Occurrence::Restored { entity } => entity,
            Occurrence::Deleted { snapshot, .. } => snapshot,
        }
    }

    pub fn resource(&self) -> Resource {
        self.entity().resource()
    }

    pub fn event(&self) -> Event {
        match self {
            Occurrence::Created { .. } => Event::Created,
            Occurrence::Updated { .. } => Event::Updated,
            Occurrence::Restored { .. } => Event::Restored,
            Occurrence::Deleted { .. } => Event::Deleted,
        }
    }

    /// Catalog topic, or `None` for pairs outside the catalog
    pub fn topic(&self) -> Option<Topic> {
        Topic::new(self.resource(), self.event())
    }
}
