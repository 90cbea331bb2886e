//! Topic catalog
//!
//! Topics are `<resource>.<event>` strings such as `order.created`. They are
//! stored as flat keys (`order_created`) and must belong to the fixed,
//! versioned catalog below.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::HookwireError;

/// Version of the topic catalog. Bump when topics are added or removed.
pub const CATALOG_VERSION: u32 = 1;

/// Entity kinds that raise occurrences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Product,
    Coupon,
    Order,
    Customer,
}

impl Resource {
    pub const ALL: [Resource; 4] = [
        Resource::Product,
        Resource::Coupon,
        Resource::Order,
        Resource::Customer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Product => "product",
            Resource::Coupon => "coupon",
            Resource::Order => "order",
            Resource::Customer => "customer",
        }
    }

    /// Events this resource publishes
    pub fn events(&self) -> &'static [Event] {
        match self {
            Resource::Customer => &[Event::Created, Event::Updated, Event::Deleted],
            _ => &[Event::Created, Event::Updated, Event::Deleted, Event::Restored],
        }
    }
}

impl FromStr for Resource {
    type Err = HookwireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "product" => Ok(Resource::Product),
            "coupon" => Ok(Resource::Coupon),
            "order" => Ok(Resource::Order),
            "customer" => Ok(Resource::Customer),
            other => Err(HookwireError::UnknownTopic(other.to_string())),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Event {
    Created,
    Updated,
    Deleted,
    Restored,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Created => "created",
            Event::Updated => "updated",
            Event::Deleted => "deleted",
            Event::Restored => "restored",
        }
    }
}

impl FromStr for Event {
    type Err = HookwireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Event::Created),
            "updated" => Ok(Event::Updated),
            "deleted" => Ok(Event::Deleted),
            "restored" => Ok(Event::Restored),
            other => Err(HookwireError::UnknownTopic(other.to_string())),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical catalog topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic {
    resource: Resource,
    event: Event,
}

impl Topic {
    /// Build a topic, rejecting pairs outside the catalog (e.g. `customer.restored`)
    pub fn new(resource: Resource, event: Event) -> Option<Self> {
        if resource.events().contains(&event) {
            Some(Self { resource, event })
        } else {
            None
        }
    }

    /// Parse a stored flat key such as `order_created`
    pub fn from_flat_key(key: &str) -> Option<Self> {
        canonical_topic(key).parse().ok()
    }

    pub fn resource(&self) -> Resource {
        self.resource
    }

    pub fn event(&self) -> Event {
        self.event
    }

    /// Flat storage key, e.g. `order_created`
    pub fn flat_key(&self) -> String {
        format!("{}_{}", self.resource, self.event)
    }

    /// Every topic in the catalog
    pub fn catalog() -> Vec<Topic> {
        Resource::ALL
            .iter()
            .flat_map(|r| r.events().iter().map(move |e| Topic { resource: *r, event: *e }))
            .collect()
    }
}

impl FromStr for Topic {
    type Err = HookwireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || HookwireError::UnknownTopic(s.to_string());
        let (resource, event) = s.split_once('.').ok_or_else(unknown)?;
        let resource: Resource = resource.parse().map_err(|_| unknown())?;
        let event: Event = event.parse().map_err(|_| unknown())?;
        Topic::new(resource, event).ok_or_else(unknown)
    }
}

impl TryFrom<String> for Topic {
    type Error = HookwireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_string()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.resource, self.event)
    }
}

/// Convert a flat key into dotted form by replacing the first underscore.
///
/// Keys without an underscore are returned unchanged.
pub fn canonical_topic(key: &str) -> String {
    match key.split_once('_') {
        Some((resource, event)) => format!("{}.{}", resource, event),
        None => key.to_string(),
    }
}
