//! Caller-facing stubs, one per invocation mode.
//!
//! A stub names an interface (and optionally a version) and forwards
//! `(method, typed arguments)` through discovery, the channel pool, and the
//! channel itself. Stubs are cheap to clone and to derive from a client.

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use tracing::warn;

use switchboard_core::arguments::Arguments;
use switchboard_core::codec::{BincodeCodec, Codec};
use switchboard_core::error::Result;
use switchboard_core::message::{service_key, CallerInfo, InvocationMode, Response};
use switchboard_fabric::ResultHandle;

use crate::callback::Callback;
use crate::client::Context;

/// What a stub calls into.
#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub(crate) interface: String,
    pub(crate) version: Option<String>,
    pub(crate) caller: CallerInfo,
}

impl Target {
    pub(crate) fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            version: None,
            caller: CallerInfo::default(),
        }
    }
}

macro_rules! target_setters {
    () => {
        /// Call the service registered under this version. Empty means
        /// unversioned.
        pub fn version(mut self, version: impl Into<String>) -> Self {
            let version = version.into();
            self.target.version = (!version.is_empty()).then_some(version);
            self
        }

        /// Attach caller metadata to every request made through this stub.
        pub fn caller(mut self, caller: CallerInfo) -> Self {
            self.target.caller = caller;
            self
        }

        pub fn interface(&self) -> &str {
            &self.target.interface
        }

        pub fn service_key(&self) -> String {
            service_key(&self.target.interface, self.target.version.as_deref())
        }
    };
}

/// Calls that wait for their result.
pub struct SyncStub<C: Codec = BincodeCodec> {
    context: Arc<Context<C>>,
    target: Target,
    timeout: Option<Duration>,
}

impl<C: Codec> Clone for SyncStub<C> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            target: self.target.clone(),
            timeout: self.timeout,
        }
    }
}

impl<C: Codec> SyncStub<C> {
    pub(crate) fn new(context: Arc<Context<C>>, target: Target) -> Self {
        let timeout = context.config.call_timeout;
        Self {
            context,
            target,
            timeout,
        }
    }

    target_setters!();

    /// Override the client's call timeout for this stub.
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Invoke `method` and wait for its result.
    ///
    /// A failure inside the service comes back as [`Error::Remote`]; a call
    /// outliving the timeout fails with [`Error::Timeout`] and its late
    /// response, if any, is discarded.
    ///
    /// [`Error::Remote`]: switchboard_core::Error::Remote
    /// [`Error::Timeout`]: switchboard_core::Error::Timeout
    pub async fn call<A, R>(&self, method: &str, arguments: A) -> Result<R>
    where
        A: Arguments,
        R: DeserializeOwned,
    {
        let request =
            self.context
                .request(&self.target, method, arguments, InvocationMode::Sync)?;
        let (_, lease) = self.context.connect(&request).await?;

        let outcome = lease
            .call(request, self.timeout, self.context.config.slow_call_threshold)
            .await;
        lease.release();

        self.context.codec.decode(&outcome?)
    }
}

/// Fire-and-forget calls. The server runs the method and never replies.
pub struct AsyncStub<C: Codec = BincodeCodec> {
    context: Arc<Context<C>>,
    target: Target,
}

impl<C: Codec> Clone for AsyncStub<C> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            target: self.target.clone(),
        }
    }
}

impl<C: Codec> AsyncStub<C> {
    pub(crate) fn new(context: Arc<Context<C>>, target: Target) -> Self {
        Self { context, target }
    }

    target_setters!();

    /// Write the request and return once it is on the wire.
    pub async fn send<A: Arguments>(&self, method: &str, arguments: A) -> Result<()> {
        let request =
            self.context
                .request(&self.target, method, arguments, InvocationMode::Async)?;
        let (_, lease) = self.context.connect(&request).await?;

        let sent = lease.send(request).await;
        lease.release();
        sent
    }
}

/// Calls whose outcome is handed to callbacks once the reply arrives.
///
/// The leased channel stays out of the pool until then, so the pool bound
/// also limits how many callback calls can be outstanding per address.
pub struct CallbackStub<R, C: Codec = BincodeCodec> {
    context: Arc<Context<C>>,
    target: Target,
    callbacks: Vec<Arc<dyn Callback<R>>>,
    _result: PhantomData<fn() -> R>,
}

impl<R, C: Codec> Clone for CallbackStub<R, C> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            target: self.target.clone(),
            callbacks: self.callbacks.clone(),
            _result: PhantomData,
        }
    }
}

impl<R, C> CallbackStub<R, C>
where
    R: DeserializeOwned + Send + 'static,
    C: Codec,
{
    pub(crate) fn new(context: Arc<Context<C>>, target: Target) -> Self {
        Self {
            context,
            target,
            callbacks: Vec::new(),
            _result: PhantomData,
        }
    }

    target_setters!();

    /// Add a callback. Every callback sees the outcome of every call.
    pub fn callback<T: Callback<R>>(mut self, callback: Arc<T>) -> Self {
        self.callbacks.push(callback);
        self
    }

    /// Write the request and return without waiting for the reply.
    ///
    /// Errors returned here mean the request never left; anything that
    /// goes wrong afterwards reaches the callbacks' `fail`.
    pub async fn send<A: Arguments>(&self, method: &str, arguments: A) -> Result<()> {
        let request = self.context.request(
            &self.target,
            method,
            arguments,
            InvocationMode::AsyncCallback,
        )?;
        let (address, lease) = self.context.connect(&request).await?;
        let channel = lease.channel().clone();
        let request_id = request.id.clone();

        let callbacks = self.callbacks.clone();
        let codec = self.context.codec.clone();
        let workers = self.context.callbacks.clone();
        let context = Arc::downgrade(&self.context);
        let in_flight_id = request_id.clone();

        let handle = ResultHandle::deferred(&request, address, move |outcome| {
            async move {
                let lease = context
                    .upgrade()
                    .and_then(|context| context.in_flight.remove(&in_flight_id))
                    .map(|(_, lease)| lease);

                let outcome = Arc::new(outcome.and_then(Response::into_result));
                for callback in callbacks {
                    let outcome = outcome.clone();
                    let codec = codec.clone();
                    let job = async move {
                        match outcome.as_ref() {
                            Ok(bytes) => match codec.decode::<R>(bytes) {
                                Ok(result) => callback.success(result).await,
                                Err(e) => callback.fail(&e).await,
                            },
                            Err(e) => callback.fail(e).await,
                        }
                    };
                    if let Err(e) = workers.execute(job).await {
                        warn!(error = %e, "dropping callback");
                    }
                }

                // Every callback is queued; the channel can serve other calls.
                drop(lease);
            }
            .boxed()
        });

        self.context.in_flight.insert(request_id.clone(), lease);
        let sent = channel.send_correlated(request, handle).await;
        if sent.is_err() {
            self.context.in_flight.remove(&request_id);
        }
        sent
    }
}
