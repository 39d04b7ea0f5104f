use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use switchboard_core::arguments::Arguments;
use switchboard_core::codec::{BincodeCodec, Codec};
use switchboard_core::error::{Error, Result};
use switchboard_core::message::{InvocationMode, Request};
use switchboard_core::worker::WorkerPool;
use switchboard_discovery::{FixedDiscovery, ServiceDiscovery};
use switchboard_fabric::{ChannelPool, PooledChannel};

use crate::config::ClientConfig;
use crate::stub::{AsyncStub, CallbackStub, SyncStub, Target};

/// Entry point for making calls: owns the discovery source, the channel
/// pool, and the workers that run callbacks.
///
/// Cloning is cheap and every clone shares the same resources.
#[derive(Clone)]
pub struct Client<C: Codec = BincodeCodec> {
    context: Arc<Context<C>>,
}

/// State shared by a client and every stub made from it.
pub(crate) struct Context<C: Codec> {
    pub(crate) config: ClientConfig,
    pub(crate) codec: C,
    pub(crate) callbacks: WorkerPool,
    discovery: Arc<dyn ServiceDiscovery>,
    pool: ChannelPool<C>,
    /// Leases of callback calls still waiting for their reply, by request
    /// id. Completions reach this map through a weak reference only, so a
    /// call that is never answered does not keep its channel alive.
    pub(crate) in_flight: DashMap<String, PooledChannel<C>>,
}

impl Client<BincodeCodec> {
    /// Must be called from within a tokio runtime.
    pub fn new(config: ClientConfig, discovery: Arc<dyn ServiceDiscovery>) -> Self {
        Self::with_codec(config, discovery, BincodeCodec)
    }

    /// A client that skips the registry and spreads every call over a
    /// static address list, picking with [`ClientConfig::fixed_policy`].
    pub fn fixed<I, S>(config: ClientConfig, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let discovery = FixedDiscovery::new(addresses).policy(config.fixed_policy);
        Self::new(config, Arc::new(discovery))
    }
}

impl<C: Codec> Client<C> {
    pub fn with_codec(config: ClientConfig, discovery: Arc<dyn ServiceDiscovery>, codec: C) -> Self {
        let pool = ChannelPool::with_codec(config.pool.clone(), codec.clone());
        let callbacks =
            WorkerPool::new("client-callbacks", config.callback_workers, config.callback_queue);

        Self {
            context: Arc::new(Context {
                config,
                codec,
                callbacks,
                discovery,
                pool,
                in_flight: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.context.config
    }

    pub fn pool(&self) -> &ChannelPool<C> {
        &self.context.pool
    }

    /// Stub whose calls wait for their result.
    pub fn sync_stub(&self, interface: impl Into<String>) -> SyncStub<C> {
        SyncStub::new(self.context.clone(), Target::new(interface))
    }

    /// Stub whose calls are fire-and-forget.
    pub fn async_stub(&self, interface: impl Into<String>) -> AsyncStub<C> {
        AsyncStub::new(self.context.clone(), Target::new(interface))
    }

    /// Stub whose results go to [`Callback`](crate::Callback)s.
    pub fn callback_stub<R>(&self, interface: impl Into<String>) -> CallbackStub<R, C>
    where
        R: DeserializeOwned + Send + 'static,
    {
        CallbackStub::new(self.context.clone(), Target::new(interface))
    }

    /// Stop discovery, close every pooled channel, and wait for queued
    /// callbacks to run. Callback calls still waiting for a reply fail with
    /// [`Error::ConnectionClosed`]. Calls made afterwards fail.
    pub async fn shutdown(&self) {
        self.context.discovery.stop().await;
        self.context.pool.close().await;

        let outstanding: Vec<String> =
            self.context.in_flight.iter().map(|e| e.key().clone()).collect();
        for request_id in outstanding {
            if let Some((_, lease)) = self.context.in_flight.remove(&request_id) {
                debug!(%request_id, "abandoning callback call");
                lease.channel().close().await;
            }
        }

        self.context.callbacks.shutdown().await;
        info!("client shut down");
    }
}

impl<C: Codec> Context<C> {
    pub(crate) fn request<A: Arguments>(
        &self,
        target: &Target,
        method: &str,
        arguments: A,
        mode: InvocationMode,
    ) -> Result<Request> {
        Ok(Request::new(target.interface.as_str(), method, mode)
            .version(target.version.clone())
            .arguments(arguments.encode(&self.codec)?)
            .caller(target.caller.clone()))
    }

    /// Resolve an address for `request` and lease a channel to it.
    ///
    /// A discovery miss fails before the pool is touched.
    pub(crate) async fn connect(&self, request: &Request) -> Result<(String, PooledChannel<C>)> {
        let service_key = request.service_key();
        let Some(address) = self.discovery.discover(&service_key, request) else {
            warn!(request_id = %request.id, %service_key, "no address available for service");
            return Err(Error::ServiceUnavailable { service_key });
        };

        let lease = self.pool.acquire(&address).await?;
        debug!(
            request_id = %request.id,
            %service_key,
            method = %request.method,
            %address,
            mode = ?request.mode,
            "dispatching call"
        );
        Ok((address, lease))
    }
}
