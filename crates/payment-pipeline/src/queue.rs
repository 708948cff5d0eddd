//! Bounded task queue and worker pool.
//!
//! `enqueue` never blocks: a full queue is reported to the caller, who
//! decides whether that is an error (withdrawal approval) or a degraded ack
//! (webhook ingestion). Workers share one receiver and drain until the last
//! queue handle is dropped.

use std::future::Future;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use fanledger_core::{LedgerError, LedgerResult};

/// Sending half of a bounded work queue.
pub struct TaskQueue<T> {
    sender: mpsc::Sender<T>,
    name: &'static str,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            name: self.name,
        }
    }
}

impl<T> TaskQueue<T> {
    /// Creates the queue and its single receiver.
    pub fn bounded(name: &'static str, capacity: usize) -> (Self, mpsc::Receiver<T>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender, name }, receiver)
    }

    /// Hands a task to the workers without waiting for capacity.
    pub fn enqueue(&self, task: T) -> LedgerResult<()> {
        match self.sender.try_send(task) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                counter!("task_queue_rejections_total", 1, "queue" => self.name);
                Err(LedgerError::conflict(format!("{} queue is full", self.name)))
            }
            Err(TrySendError::Closed(_)) => Err(LedgerError::conflict(format!(
                "{} queue is closed",
                self.name
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// A set of identical workers draining one receiver.
pub struct WorkerPool {
    name: &'static str,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `workers` tasks that pull from `receiver` until it closes.
    pub fn spawn<T, F, Fut>(
        name: &'static str,
        workers: usize,
        receiver: mpsc::Receiver<T>,
        handler: F,
    ) -> Self
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let receiver = Arc::new(Mutex::new(receiver));
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let receiver = Arc::clone(&receiver);
            let handler = handler.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    // The lock is held only while waiting for a task, never
                    // while handling one.
                    let task = receiver.lock().await.recv().await;
                    match task {
                        Some(task) => handler(task).await,
                        None => break,
                    }
                }
                debug!(name, worker, "worker loop terminated");
            }));
        }
        Self { name, handles }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Awaits every worker. Call after all queue handles are dropped.
    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
