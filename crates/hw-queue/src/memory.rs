//! In-memory delivery queue

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::{DeliveryQueue, QueueError, QueuedTask, Result, TaskArgs};

struct Channel {
    tx: mpsc::UnboundedSender<QueuedTask>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<QueuedTask>>>,
}

impl Channel {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }
}

/// One unbounded channel per queue name, created on first use.
///
/// Tasks are held in memory only; a restart loses anything not yet consumed.
#[derive(Default)]
pub struct MemoryDeliveryQueue {
    channels: DashMap<String, Channel>,
    enqueued: AtomicU64,
}

impl MemoryDeliveryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the consumer end of a queue. Returns `None` if already taken.
    pub fn take_receiver(&self, queue_name: &str) -> Option<mpsc::UnboundedReceiver<QueuedTask>> {
        let channel = self
            .channels
            .entry(queue_name.to_string())
            .or_insert_with(Channel::new);
        let rx = channel.rx.lock().take();
        rx
    }

    /// Total tasks enqueued across all queues
    pub fn enqueued_count(&self) -> u64 {
        self.enqueued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryQueue for MemoryDeliveryQueue {
    fn identifier(&self) -> &str {
        "memory"
    }

    async fn enqueue(&self, task_name: &str, args: TaskArgs, queue_name: &str) -> Result<String> {
        let task = QueuedTask::new(task_name, args, queue_name);
        let id = task.id.clone();

        let channel = self
            .channels
            .entry(queue_name.to_string())
            .or_insert_with(Channel::new);
        channel
            .tx
            .send(task)
            .map_err(|_| QueueError::Closed(queue_name.to_string()))?;

        self.enqueued.fetch_add(1, Ordering::SeqCst);
        debug!(task_id = %id, task_name = %task_name, queue = %queue_name, "Task enqueued");
        Ok(id)
    }
}
