// Per-connection task serialization
//
// One worker task per connection drains a bounded FIFO. Only one task runs
// at a time, so client functions never race on the same StateHandler. A task
// that errors or panics is logged and the worker moves on to the next one.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{error, warn};


type Task = BoxFuture<'static, anyhow::Result<()>>;

/// Reasons a task was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PostError {
    #[error("connection queue is full")]
    Full,
    #[error("connection queue is stopped")]
    Stopped,
}

/// Single-flight FIFO executor
pub struct ConnectionQueue {
    tx: Option<mpsc::Sender<Task>>,
    /// Set once pending tasks should be dropped instead of run
    discarded: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl ConnectionQueue {
    /// Create a queue holding at most `capacity` pending tasks and spawn its
    /// worker on the current runtime
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let discarded = Arc::new(AtomicBool::new(false));
        let worker = tokio::spawn(run_worker(rx, Arc::clone(&discarded)));

        Self {
            tx: Some(tx),
            discarded,
            worker: Some(worker),
        }
    }

    /// Enqueue a task. It starts once every previously posted task has settled.
    ///
    /// Never waits: a queue already holding `capacity` pending tasks refuses
    /// the new one.
    pub fn post<F>(&self, task: F) -> Result<(), PostError>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let Some(tx) = &self.tx else {
            return Err(PostError::Stopped);
        };
        match tx.try_send(task.boxed()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(PostError::Full),
            Err(TrySendError::Closed(_)) => {
                warn!("Task posted to a stopped connection queue");
                Err(PostError::Stopped)
            }
        }
    }

    /// Drop every task that has not started yet. An in-flight task still runs
    /// to completion.
    pub fn discard(&mut self) {
        self.discarded.store(true, Ordering::SeqCst);
        self.tx = None;
    }

    /// Stop accepting tasks, run the ones already queued, and wait for the
    /// worker to finish
    pub async fn shutdown(mut self) {
        self.tx = None;
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                error!(error = %e, "Connection queue worker failed");
            }
        }
    }
}

impl Drop for ConnectionQueue {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.discard();
        }
    }
}

async fn run_worker(mut rx: mpsc::Receiver<Task>, discarded: Arc<AtomicBool>) {
    while let Some(task) = rx.recv().await {
        if discarded.load(Ordering::SeqCst) {
            break;
        }

        match AssertUnwindSafe(task).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(error = %e, "Queued task failed");
            }
            Err(_) => {
                error!("Queued task panicked");
            }
        }
    }
}
