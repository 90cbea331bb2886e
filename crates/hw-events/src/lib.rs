//! Hookwire Events
//!
//! The synchronous half of the engine, run inside the request that raised
//! a domain occurrence:
//! - `entity`: domain entities and occurrences
//! - `capture`: entity to self-contained JSON payload
//! - `listener`: one listener per catalog topic
//! - `registry`: binds listeners to published webhooks and enqueues delivery jobs

pub mod capture;
pub mod entity;
pub mod listener;
pub mod registry;

pub use capture::{capture_occurrence, CaptureError, Captured, NoOrderDetails, OrderDetails};
pub use entity::{Address, Coupon, Customer, Entity, LineItem, MetaEntry, Occurrence, Order, OrderTotals, Product, Refund};
pub use listener::{listener_for, Listener};
pub use registry::{ListenerRegistry, PublishReport, DELIVER_TASK};
