//! # Serial Command Queue
//!
//! FIFO, single-flight execution of every bus-touching task.
//!
//! Tasks are sent over a channel to one worker task, which runs them to
//! completion one at a time in arrival order. Each task reports to its own
//! [`TaskHandle`]; a failing or panicking task does not affect the ones
//! queued behind it. Tasks are never cancelled once dequeued.
//!
//! ```rust
//! use thermobus::queue::SerialCommandQueue;
//!
//! # #[tokio::main]
//! # async fn main() -> thermobus::BridgeResult<()> {
//! let queue = SerialCommandQueue::new();
//! let first = queue.enqueue(async { Ok(1) });
//! let second = queue.enqueue(async { Ok(2) });
//! assert_eq!(first.wait().await? + second.wait().await?, 3);
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::{BridgeError, BridgeResult};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Handle to the single worker draining the queue.
///
/// Cloning the queue shares the same worker.
#[derive(Debug, Clone)]
pub struct SerialCommandQueue {
    tx: mpsc::UnboundedSender<Job>,
    depth: Arc<AtomicUsize>,
}

impl SerialCommandQueue {
    /// Spawn the worker on the current tokio runtime.
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            debug!("command queue drained and closed");
        });
        Self {
            tx,
            depth: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Append a task; it starts once every earlier task has completed.
    pub fn enqueue<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: Future<Output = BridgeResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let depth = Arc::clone(&self.depth);
        let job: Job = Box::pin(async move {
            // Run on its own task so a panic only fails this handle
            let outcome = match tokio::spawn(task).await {
                Ok(result) => result,
                Err(join_err) => {
                    error!(error = %join_err, "queued task aborted");
                    Err(BridgeError::queue_closed(format!("task aborted: {}", join_err)))
                }
            };
            depth.fetch_sub(1, Ordering::SeqCst);
            // The caller may have dropped its handle
            let _ = done_tx.send(outcome);
        });

        let pending = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        if self.tx.send(job).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            error!("command queue worker is gone");
        } else {
            debug!(pending, "task enqueued");
        }
        TaskHandle { rx: done_rx }
    }

    /// Tasks enqueued but not yet completed.
    pub fn pending(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }
}

impl Default for SerialCommandQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Completion handle of one queued task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<BridgeResult<T>>,
}

impl<T> TaskHandle<T> {
    /// Wait for the task's result.
    pub async fn wait(self) -> BridgeResult<T> {
        self.rx
            .await
            .unwrap_or_else(|_| Err(BridgeError::queue_closed("task dropped before completion")))
    }
}
