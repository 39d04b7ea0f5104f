//! Per-channel correlation of in-flight requests with their result handles.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use switchboard_core::error::{Error, Result};
use switchboard_core::message::{Request, Response};

/// Deferred completion run on the channel's reader task when the response
/// (or a transport failure) arrives.
pub type CompletionFn = Box<dyn FnOnce(Result<Response>) -> BoxFuture<'static, ()> + Send + Sync>;

enum Completion {
    Waiter(oneshot::Sender<Result<Response>>),
    Deferred(CompletionFn),
}

/// Correlation object for one request expecting a response.
///
/// Consumed by [`ResultHandle::complete`], so it resolves at most once.
pub struct ResultHandle {
    request_id: String,
    address: String,
    started: Instant,
    slow_call_threshold: Option<Duration>,
    completion: Completion,
}

impl ResultHandle {
    /// A handle whose outcome is awaited through the returned [`ResultWaiter`].
    pub fn waiter(request: &Request, address: impl Into<String>) -> (Self, ResultWaiter) {
        let (tx, rx) = oneshot::channel();
        let handle = Self::with_completion(request, address.into(), Completion::Waiter(tx));
        let waiter = ResultWaiter {
            request_id: request.id.clone(),
            interface: request.interface.clone(),
            method: request.method.clone(),
            receiver: rx,
        };
        (handle, waiter)
    }

    /// A handle that hands its outcome to `completion` instead of a waiter.
    pub fn deferred<F>(request: &Request, address: impl Into<String>, completion: F) -> Self
    where
        F: FnOnce(Result<Response>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        Self::with_completion(request, address.into(), Completion::Deferred(Box::new(completion)))
    }

    fn with_completion(request: &Request, address: String, completion: Completion) -> Self {
        Self {
            request_id: request.id.clone(),
            address,
            started: Instant::now(),
            slow_call_threshold: None,
            completion,
        }
    }

    /// Warn when the round trip exceeds `threshold`.
    pub fn slow_call_threshold(mut self, threshold: Option<Duration>) -> Self {
        self.slow_call_threshold = threshold;
        self
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub async fn complete(self, outcome: Result<Response>) {
        let elapsed = self.started.elapsed();
        if let (Some(threshold), Ok(_)) = (self.slow_call_threshold, &outcome) {
            if elapsed > threshold {
                warn!(
                    request_id = %self.request_id,
                    address = %self.address,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "service response time is too slow"
                );
            }
        }

        match self.completion {
            // The waiter may have timed out and gone away already.
            Completion::Waiter(tx) => {
                let _ = tx.send(outcome);
            }
            Completion::Deferred(f) => f(outcome).await,
        }
    }
}

/// Caller side of a [`ResultHandle`] created with [`ResultHandle::waiter`].
pub struct ResultWaiter {
    request_id: String,
    interface: String,
    method: String,
    receiver: oneshot::Receiver<Result<Response>>,
}

impl ResultWaiter {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Wait for the outcome, bounded by `timeout` when given.
    pub async fn wait(self, timeout: Option<Duration>) -> Result<Response> {
        let outcome = match timeout {
            Some(timeout) => match tokio::time::timeout(timeout, self.receiver).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(Error::Timeout {
                        request_id: self.request_id,
                        interface: self.interface,
                        method: self.method,
                    })
                }
            },
            None => self.receiver.await,
        };
        outcome.map_err(|_| Error::ConnectionClosed)?
    }
}

/// Request id to result handle map, scoped to one channel.
#[derive(Default)]
pub struct PendingCalls {
    calls: DashMap<String, ResultHandle>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle under its request id.
    ///
    /// Fails if the id is already pending on this channel.
    pub fn insert(&self, handle: ResultHandle) -> Result<()> {
        match self.calls.entry(handle.request_id.clone()) {
            Entry::Occupied(_) => Err(Error::custom(format!(
                "request id {} is already pending",
                handle.request_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(handle);
                Ok(())
            }
        }
    }

    /// Remove a handle without completing it. Idempotent.
    pub fn remove(&self, request_id: &str) -> Option<ResultHandle> {
        self.calls.remove(request_id).map(|(_, handle)| handle)
    }

    /// Route a response to the handle registered under its request id.
    ///
    /// Returns false when nothing is waiting for it, e.g. a late response
    /// after the caller timed out. Such responses are dropped.
    pub async fn complete(&self, response: Response) -> bool {
        match self.remove(&response.request_id) {
            Some(handle) => {
                handle.complete(Ok(response)).await;
                true
            }
            None => {
                debug!(request_id = %response.request_id, "discarding uncorrelated response");
                false
            }
        }
    }

    /// Fail every pending handle, typically because the channel died.
    pub async fn fail_all(&self, error: impl Fn() -> Error) {
        let ids: Vec<String> = self.calls.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some(handle) = self.remove(&id) {
                handle.complete(Err(error())).await;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.calls.contains_key(request_id)
    }
}
