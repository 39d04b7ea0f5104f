//! Bounded worker pool used for client callbacks and offloaded server dispatch.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};

type Job = BoxFuture<'static, ()>;

/// Twice the available parallelism, the default worker count.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(8)
}

/// A fixed set of tokio tasks draining a bounded job queue.
///
/// Submitting waits while the queue is full. Panics inside a job are caught
/// and logged; the worker keeps running.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    sender: RwLock<Option<mpsc::Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `workers` tasks on the current runtime.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(name: impl Into<String>, workers: usize, queue: usize) -> Self {
        let name = name.into();
        let (sender, receiver) = mpsc::channel::<Job>(queue.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|index| {
                let receiver = receiver.clone();
                let name = name.clone();
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        let Some(job) = job else { break };
                        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
                            warn!(pool = %name, worker = index, "job panicked");
                        }
                    }
                    debug!(pool = %name, worker = index, "worker stopped");
                })
            })
            .collect();

        Self {
            inner: Arc::new(Inner {
                name,
                sender: RwLock::new(Some(sender)),
                workers: Mutex::new(handles),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Queue a job, waiting for room if the queue is full.
    pub async fn execute<F>(&self, job: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self
            .inner
            .sender
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or_else(|| self.rejected())?;

        sender.send(Box::pin(job)).await.map_err(|_| self.rejected())
    }

    /// Stop accepting jobs, let queued ones finish, and wait for the workers.
    pub async fn shutdown(&self) {
        if let Ok(mut sender) = self.inner.sender.write() {
            sender.take();
        }

        let handles = match self.inner.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            let _ = handle.await;
        }
        debug!(pool = %self.inner.name, "worker pool shut down");
    }

    fn rejected(&self) -> Error {
        Error::custom(format!("worker pool '{}' is shut down", self.inner.name))
    }
}
