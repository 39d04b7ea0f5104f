//! Per-address pools of established channels.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use switchboard_core::codec::{BincodeCodec, Codec};
use switchboard_core::error::{Error, Result};

use crate::channel::Channel;
use crate::config::PoolConfig;
use crate::frame::ClientCodec;
use crate::transport::TcpConnector;

/// Bounded channel pools keyed by remote `host:port`.
///
/// The pool for an address is created on first use. Channels inside it are
/// opened lazily, up to [`PoolConfig::max_connections`]; callers beyond the
/// bound wait for a release. Once [`close`](Self::close)d the pool rejects
/// every further acquisition.
pub struct ChannelPool<C: Codec = BincodeCodec> {
    pools: DashMap<String, Arc<PoolEntry<C>>>,
    create_lock: Mutex<()>,
    config: PoolConfig,
    connector: TcpConnector,
    codec: ClientCodec<C>,
    closed: AtomicBool,
}

struct PoolEntry<C: Codec> {
    address: String,
    idle: Mutex<Vec<Arc<Channel<C>>>>,
    permits: Arc<Semaphore>,
    live: AtomicUsize,
    closed: AtomicBool,
}

impl ChannelPool<BincodeCodec> {
    pub fn new(config: PoolConfig) -> Self {
        Self::with_codec(config, BincodeCodec)
    }
}

impl<C: Codec> ChannelPool<C> {
    pub fn with_codec(config: PoolConfig, codec: C) -> Self {
        let connector = TcpConnector::new().connect_timeout(config.connect_timeout);
        let codec = ClientCodec::new(codec).max_frame_size(config.max_frame_size);
        Self {
            pools: DashMap::new(),
            create_lock: Mutex::new(()),
            config,
            connector,
            codec,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Take a channel to `address`, reusing an idle one or opening a new one
    /// while under the bound.
    ///
    /// Fails with [`Error::ChannelUnavailable`] when the wait for a free
    /// channel exceeds the acquire timeout or the connection attempt fails,
    /// and with [`Error::PoolClosed`] after [`close`](Self::close).
    pub async fn acquire(&self, address: &str) -> Result<PooledChannel<C>> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }
        let entry = self.entry(address)?;

        let permit = match self.config.acquire_timeout {
            Some(timeout) => tokio::time::timeout(timeout, entry.permits.clone().acquire_owned())
                .await
                .map_err(|_| {
                    Error::ChannelUnavailable(format!(
                        "timed out waiting for a free channel to {}",
                        address
                    ))
                })?,
            None => entry.permits.clone().acquire_owned().await,
        }
        .map_err(|_| Error::PoolClosed)?;

        while let Some(channel) = entry.pop_idle() {
            if channel.is_open() {
                debug!(channel = channel.id(), %address, "acquired pooled channel");
                return Ok(PooledChannel::new(channel, entry, permit));
            }
            entry.discard(&channel);
        }

        let channel = Channel::connect(address, &self.connector, self.codec.clone())
            .await
            .map_err(|e| Error::ChannelUnavailable(format!("failed to connect to {}: {}", address, e)))?;
        entry.live.fetch_add(1, Ordering::AcqRel);

        Ok(PooledChannel::new(Arc::new(channel), entry, permit))
    }

    /// Return a channel to its pool. Equivalent to dropping the lease.
    pub fn release(&self, lease: PooledChannel<C>) {
        lease.release();
    }

    /// Close every pool and the channels in it. Leased channels are dropped
    /// as they come back, which closes their connections.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let entries: Vec<Arc<PoolEntry<C>>> =
            self.pools.iter().map(|e| e.value().clone()).collect();
        self.pools.clear();

        for entry in entries {
            entry.closed.store(true, Ordering::Release);
            entry.permits.close();
            let idle = entry.drain_idle();
            for channel in idle {
                channel.close().await;
                entry.live.fetch_sub(1, Ordering::AcqRel);
            }
            info!(address = %entry.address, "closed channel pool");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Live channels (idle and leased) currently held for `address`.
    pub fn live_channels(&self, address: &str) -> usize {
        self.pools
            .get(address)
            .map(|e| e.live.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Addresses that have a pool.
    pub fn addresses(&self) -> Vec<String> {
        self.pools.iter().map(|e| e.key().clone()).collect()
    }

    fn entry(&self, address: &str) -> Result<Arc<PoolEntry<C>>> {
        if let Some(entry) = self.pools.get(address) {
            return Ok(entry.value().clone());
        }

        // Concurrent first users of an address must end up sharing one pool.
        let _guard = self
            .create_lock
            .lock()
            .map_err(|_| Error::custom("channel pool lock poisoned"))?;
        if let Some(entry) = self.pools.get(address) {
            return Ok(entry.value().clone());
        }
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        let entry = Arc::new(PoolEntry::new(address, self.config.max_connections));
        self.pools.insert(address.to_string(), entry.clone());
        debug!(%address, max = self.config.max_connections, "created channel pool");
        Ok(entry)
    }
}

impl<C: Codec> PoolEntry<C> {
    fn new(address: &str, max_connections: usize) -> Self {
        Self {
            address: address.to_string(),
            idle: Mutex::new(Vec::new()),
            permits: Arc::new(Semaphore::new(max_connections.max(1))),
            live: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn pop_idle(&self) -> Option<Arc<Channel<C>>> {
        self.idle.lock().ok().and_then(|mut idle| idle.pop())
    }

    fn drain_idle(&self) -> Vec<Arc<Channel<C>>> {
        self.idle
            .lock()
            .map(|mut idle| std::mem::take(&mut *idle))
            .unwrap_or_default()
    }

    fn discard(&self, channel: &Channel<C>) {
        self.live.fetch_sub(1, Ordering::AcqRel);
        debug!(channel = channel.id(), address = %self.address, "discarded channel");
    }

    fn put_back(&self, channel: Arc<Channel<C>>) {
        if self.closed.load(Ordering::Acquire) || !channel.is_open() {
            self.discard(&channel);
            return;
        }
        debug!(channel = channel.id(), address = %self.address, "released channel to pool");
        match self.idle.lock() {
            Ok(mut idle) => idle.push(channel),
            Err(_) => self.discard(&channel),
        }
    }
}

/// A channel on loan from a [`ChannelPool`].
///
/// Goes back to its pool when released or dropped; the per-address bound
/// is held until then.
pub struct PooledChannel<C: Codec = BincodeCodec> {
    channel: Arc<Channel<C>>,
    entry: Arc<PoolEntry<C>>,
    permit: Option<OwnedSemaphorePermit>,
}

impl<C: Codec> PooledChannel<C> {
    fn new(channel: Arc<Channel<C>>, entry: Arc<PoolEntry<C>>, permit: OwnedSemaphorePermit) -> Self {
        Self {
            channel,
            entry,
            permit: Some(permit),
        }
    }

    /// Shared handle to the underlying channel.
    pub fn channel(&self) -> &Arc<Channel<C>> {
        &self.channel
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        // The permit doubles as the "still on loan" marker.
        if let Some(permit) = self.permit.take() {
            self.entry.put_back(self.channel.clone());
            drop(permit);
        }
    }
}

impl<C: Codec> Deref for PooledChannel<C> {
    type Target = Channel<C>;

    fn deref(&self) -> &Channel<C> {
        &self.channel
    }
}

impl<C: Codec> Drop for PooledChannel<C> {
    fn drop(&mut self) {
        self.release_inner();
    }
}
