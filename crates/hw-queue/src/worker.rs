//! Queue worker
//!
//! Pulls tasks off one queue and runs them on spawned tasks, bounded by a
//! semaphore. Tasks for the same webhook may run concurrently and in any
//! order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tracing::{debug, error, info, warn};

use crate::QueuedTask;

/// Result of running one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Failed { error: String },
}

/// Executes tasks of one task name
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &QueuedTask) -> TaskOutcome;
}

pub struct QueueWorker {
    queue_name: String,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    concurrency: usize,
}

impl QueueWorker {
    pub fn new(queue_name: impl Into<String>, concurrency: usize) -> Self {
        Self {
            queue_name: queue_name.into(),
            handlers: HashMap::new(),
            concurrency: concurrency.max(1),
        }
    }

    /// Route tasks named `task_name` to `handler`
    pub fn register(mut self, task_name: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(task_name.into(), handler);
        self
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Run a single task inline
    pub async fn process(&self, task: &QueuedTask) -> TaskOutcome {
        run_task(self.handlers.get(&task.task_name).cloned(), task).await
    }

    /// Consume until the channel closes or shutdown is signalled, then wait
    /// for in-flight tasks to finish.
    pub async fn run(
        self,
        mut rx: mpsc::UnboundedReceiver<QueuedTask>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        info!(
            queue = %self.queue_name,
            concurrency = self.concurrency,
            task_names = ?self.handlers.keys().collect::<Vec<_>>(),
            "Starting queue worker"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        loop {
            let task = tokio::select! {
                task = rx.recv() => match task {
                    Some(task) => task,
                    None => {
                        debug!(queue = %self.queue_name, "Queue channel closed");
                        break;
                    }
                },
                _ = shutdown_rx.recv() => {
                    info!(queue = %self.queue_name, "Queue worker shutting down");
                    break;
                }
            };

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            let handler = self.handlers.get(&task.task_name).cloned();

            tokio::spawn(async move {
                let _permit = permit;
                run_task(handler, &task).await;
            });
        }

        // Drain in-flight work
        let _ = semaphore.acquire_many(self.concurrency as u32).await;
        info!(queue = %self.queue_name, "Queue worker stopped");
    }
}

async fn run_task(handler: Option<Arc<dyn TaskHandler>>, task: &QueuedTask) -> TaskOutcome {
    let Some(handler) = handler else {
        error!(
            task_id = %task.id,
            task_name = %task.task_name,
            queue = %task.queue_name,
            "No handler registered for task"
        );
        return TaskOutcome::Failed {
            error: format!("No handler for task {}", task.task_name),
        };
    };

    let outcome = handler.handle(task).await;
    match &outcome {
        TaskOutcome::Completed => {
            debug!(task_id = %task.id, task_name = %task.task_name, "Task completed");
        }
        TaskOutcome::Failed { error } => {
            warn!(task_id = %task.id, task_name = %task.task_name, error = %error, "Task failed");
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DeliveryQueue, MemoryDeliveryQueue, TaskArgs};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        count: AtomicUsize,
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        async fn handle(&self, _task: &QueuedTask) -> TaskOutcome {
            self.count.fetch_add(1, Ordering::SeqCst);
            TaskOutcome::Completed
        }
    }

    #[tokio::test]
    async fn test_process_routes_by_task_name() {
        let handler = Arc::new(CountingHandler { count: AtomicUsize::new(0) });
        let worker = QueueWorker::new("webhooks", 2).register("deliver", handler.clone());

        let task = QueuedTask::new("deliver", TaskArgs::new(), "webhooks");
        assert_eq!(worker.process(&task).await, TaskOutcome::Completed);
        assert_eq!(handler.count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_task_fails() {
        let worker = QueueWorker::new("webhooks", 1);
        let task = QueuedTask::new("mystery", TaskArgs::new(), "webhooks");
        assert!(matches!(worker.process(&task).await, TaskOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn test_run_drains_queue_until_closed() {
        let queue = MemoryDeliveryQueue::new();
        let rx = queue.take_receiver("webhooks").unwrap();
        for _ in 0..5 {
            queue.enqueue("deliver", TaskArgs::new(), "webhooks").await.unwrap();
        }
        // Dropping the queue closes the sender side
        drop(queue);

        let handler = Arc::new(CountingHandler { count: AtomicUsize::new(0) });
        let worker = QueueWorker::new("webhooks", 3).register("deliver", handler.clone());
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        worker.run(rx, shutdown_rx).await;
        assert_eq!(handler.count.load(Ordering::SeqCst), 5);
    }
}
