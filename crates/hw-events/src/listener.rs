//! Listeners
//!
//! One listener value per catalog topic. A listener checks that an
//! occurrence belongs to its topic and captures the payload for it.

use std::sync::Arc;

use hw_common::{Resource, Topic};

use crate::capture::{
    capture_coupon, capture_customer, capture_deleted, capture_order, capture_product, CaptureError, Captured,
    NoOrderDetails, OrderDetails,
};
use crate::entity::{Entity, Occurrence};

pub trait Listener: Send + Sync {
    fn topic(&self) -> Topic;

    /// Capture the payload for an occurrence of this listener's topic
    fn capture(&self, occurrence: &Occurrence) -> Result<Captured, CaptureError>;
}

fn check_topic(expected: Topic, occurrence: &Occurrence) -> Result<(), CaptureError> {
    match occurrence.topic() {
        Some(actual) if actual == expected => Ok(()),
        actual => Err(CaptureError::KindMismatch {
            expected: expected.to_string(),
            actual: actual
                .map(|t| t.to_string())
                .unwrap_or_else(|| format!("{}.{}", occurrence.resource(), occurrence.event())),
        }),
    }
}

fn mismatch(expected: Topic, entity: &Entity) -> CaptureError {
    CaptureError::KindMismatch {
        expected: expected.to_string(),
        actual: entity.resource().to_string(),
    }
}

pub struct ProductListener {
    topic: Topic,
}

impl Listener for ProductListener {
    fn topic(&self) -> Topic {
        self.topic
    }

    fn capture(&self, occurrence: &Occurrence) -> Result<Captured, CaptureError> {
        check_topic(self.topic, occurrence)?;
        match occurrence {
            Occurrence::Deleted { id, snapshot } => Ok(capture_deleted(*id, snapshot, &NoOrderDetails)),
            other => match other.entity() {
                Entity::Product(p) => Ok(Captured {
                    payload: capture_product(p),
                    warnings: Vec::new(),
                }),
                entity => Err(mismatch(self.topic, entity)),
            },
        }
    }
}

pub struct CouponListener {
    topic: Topic,
}

impl Listener for CouponListener {
    fn topic(&self) -> Topic {
        self.topic
    }

    fn capture(&self, occurrence: &Occurrence) -> Result<Captured, CaptureError> {
        check_topic(self.topic, occurrence)?;
        match occurrence {
            Occurrence::Deleted { id, snapshot } => Ok(capture_deleted(*id, snapshot, &NoOrderDetails)),
            other => match other.entity() {
                Entity::Coupon(c) => Ok(Captured {
                    payload: capture_coupon(c),
                    warnings: Vec::new(),
                }),
                entity => Err(mismatch(self.topic, entity)),
            },
        }
    }
}

pub struct CustomerListener {
    topic: Topic,
}

impl Listener for CustomerListener {
    fn topic(&self) -> Topic {
        self.topic
    }

    fn capture(&self, occurrence: &Occurrence) -> Result<Captured, CaptureError> {
        check_topic(self.topic, occurrence)?;
        match occurrence {
            Occurrence::Deleted { id, snapshot } => Ok(capture_deleted(*id, snapshot, &NoOrderDetails)),
            other => match other.entity() {
                Entity::Customer(c) => Ok(Captured {
                    payload: capture_customer(c),
                    warnings: Vec::new(),
                }),
                entity => Err(mismatch(self.topic, entity)),
            },
        }
    }
}

/// Orders pull optional sub-aggregates from a details source
pub struct OrderListener {
    topic: Topic,
    details: Arc<dyn OrderDetails>,
}

impl Listener for OrderListener {
    fn topic(&self) -> Topic {
        self.topic
    }

    fn capture(&self, occurrence: &Occurrence) -> Result<Captured, CaptureError> {
        check_topic(self.topic, occurrence)?;
        match occurrence {
            // The order is gone, so there are no sub-aggregates left to look up
            Occurrence::Deleted { id, snapshot } => Ok(capture_deleted(*id, snapshot, &NoOrderDetails)),
            other => match other.entity() {
                Entity::Order(o) => Ok(capture_order(o, self.details.as_ref())),
                entity => Err(mismatch(self.topic, entity)),
            },
        }
    }
}

/// Build the listener for a catalog topic
pub fn listener_for(topic: Topic, details: &Arc<dyn OrderDetails>) -> Arc<dyn Listener> {
    match topic.resource() {
        Resource::Product => Arc::new(ProductListener { topic }),
        Resource::Coupon => Arc::new(CouponListener { topic }),
        Resource::Order => Arc::new(OrderListener {
            topic,
            details: details.clone(),
        }),
        Resource::Customer => Arc::new(CustomerListener { topic }),
    }
}
