use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use switchboard_core::codec::{BincodeCodec, Codec};
use switchboard_core::error::{Error, Result};
use switchboard_core::message::{Request, Response};

use crate::frame::ClientCodec;
use crate::pending::{PendingCalls, ResultHandle};
use crate::transport::{framed, FrameWriter, TcpConnector};

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Client side of one persistent connection.
///
/// Requests are written through a shared writer; a background reader task
/// routes every inbound response to the handle registered under its request
/// id in this channel's [`PendingCalls`], so several correlated calls can be
/// in flight on the same channel at once.
///
/// Closing or dropping the channel stops the reader, which then fails
/// whatever is still pending. Handles may drop the last reference to their
/// channel from inside their completion; the reader finishes that
/// completion before it stops.
pub struct Channel<C: Codec = BincodeCodec> {
    id: u64,
    address: String,
    writer: Mutex<FrameWriter<Response, Request, C>>,
    pending: Arc<PendingCalls>,
    open: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl<C: Codec> Channel<C> {
    /// Open a channel to a `host:port` address
    pub async fn connect(
        address: &str,
        connector: &TcpConnector,
        codec: ClientCodec<C>,
    ) -> Result<Self> {
        let stream = connector.connect(address).await?;
        let (mut frames, writer) = framed(stream, codec);

        let id = NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed);
        let pending = Arc::new(PendingCalls::new());
        let open = Arc::new(AtomicBool::new(true));
        let shutdown = CancellationToken::new();

        {
            let pending = pending.clone();
            let open = open.clone();
            let shutdown = shutdown.clone();
            let address = address.to_string();
            tokio::spawn(async move {
                loop {
                    let frame = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => break,
                        frame = frames.next() => frame,
                    };
                    match frame {
                        Some(Ok(response)) => {
                            pending.complete(response).await;
                        }
                        Some(Err(e)) => {
                            warn!(channel = id, %address, error = %e, "closing channel after transport failure");
                            break;
                        }
                        None => break,
                    }
                }
                open.store(false, Ordering::Release);
                debug!(channel = id, %address, in_flight = pending.len(), "channel reader stopped");
                pending.fail_all(|| Error::ConnectionClosed).await;
            });
        }

        debug!(channel = id, %address, "created new channel");
        Ok(Self {
            id,
            address: address.to_string(),
            writer: Mutex::new(writer),
            pending,
            open,
            shutdown,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// The `host:port` this channel is connected to
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn pending(&self) -> &PendingCalls {
        &self.pending
    }

    /// Write a request without registering anything to correlate a reply.
    pub async fn send(&self, request: Request) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }

        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.send(request).await {
            drop(writer);
            self.mark_broken(&e);
            return Err(e);
        }
        Ok(())
    }

    /// Register `handle` under the request id, then write the request.
    ///
    /// If the write fails the registration is withdrawn and the handle is
    /// dropped without being completed.
    pub async fn send_correlated(&self, request: Request, handle: ResultHandle) -> Result<()> {
        let request_id = request.id.clone();
        self.pending.insert(handle)?;
        if let Err(e) = self.send(request).await {
            self.pending.remove(&request_id);
            return Err(e);
        }
        Ok(())
    }

    /// Send a request and wait for its response.
    ///
    /// On timeout the registration is withdrawn; a late response is then
    /// discarded by the reader. Server-side failures come back as
    /// [`Error::Remote`].
    pub async fn call(
        &self,
        request: Request,
        timeout: Option<Duration>,
        slow_call_threshold: Option<Duration>,
    ) -> Result<Vec<u8>> {
        let (handle, waiter) = ResultHandle::waiter(&request, self.address.clone());
        let handle = handle.slow_call_threshold(slow_call_threshold);
        let request_id = request.id.clone();

        self.send_correlated(request, handle).await?;

        match waiter.wait(timeout).await {
            Ok(response) => response.into_result(),
            Err(e) => {
                self.pending.remove(&request_id);
                Err(e)
            }
        }
    }

    /// Close the connection and fail everything still pending on it.
    ///
    /// Pending handles are completed on the caller's task before this
    /// returns.
    pub async fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.pending.fail_all(|| Error::ConnectionClosed).await;
        self.shutdown.cancel();
        {
            let mut writer = self.writer.lock().await;
            let _ = writer.get_mut().shutdown().await;
        }
        debug!(channel = self.id, address = %self.address, "channel closed");
    }

    fn mark_broken(&self, error: &Error) {
        warn!(channel = self.id, address = %self.address, error = %error, "write failed, closing channel");
        self.open.store(false, Ordering::Release);
        // The reader fails the pending calls on its way out.
        self.shutdown.cancel();
    }
}

impl<C: Codec> Drop for Channel<C> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
