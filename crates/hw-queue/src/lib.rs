//! Hookwire Delivery Queue
//!
//! The durable task queue is an external collaborator. This crate defines
//! the seam the engine consumes plus:
//! - MemoryDeliveryQueue: tokio channel per queue name, for development and tests
//! - QueueWorker: consumes one queue and routes tasks to handlers by task name
//!
//! Delivery is at-least-once with no ordering guarantee. Nothing here retries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod memory;
pub mod worker;

pub use memory::MemoryDeliveryQueue;
pub use worker::{QueueWorker, TaskHandler, TaskOutcome};

/// Task arguments: a JSON object
pub type TaskArgs = serde_json::Map<String, serde_json::Value>;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue closed: {0}")]
    Closed(String),
    #[error("Enqueue failed: {0}")]
    Enqueue(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;

/// A task recorded on a queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    pub id: String,
    pub task_name: String,
    pub queue_name: String,
    pub args: TaskArgs,
    pub enqueued_at: DateTime<Utc>,
}

impl QueuedTask {
    pub fn new(task_name: &str, args: TaskArgs, queue_name: &str) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_name: task_name.to_string(),
            queue_name: queue_name.to_string(),
            args,
            enqueued_at: Utc::now(),
        }
    }
}

/// Records tasks for asynchronous execution.
///
/// `enqueue` must only record the task; execution happens later in a worker.
#[async_trait]
pub trait DeliveryQueue: Send + Sync {
    fn identifier(&self) -> &str;

    /// Record a task and return its id
    async fn enqueue(&self, task_name: &str, args: TaskArgs, queue_name: &str) -> Result<String>;
}
