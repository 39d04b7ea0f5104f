//! Service definitions: explicit per-method invokers instead of reflection.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tracing::debug;

use switchboard_core::arguments::{Argument, Arguments};
use switchboard_core::codec::{BincodeCodec, Codec};
use switchboard_core::message::{service_key, FailureKind, RemoteFailure};

/// Encoded result of one method invocation.
pub type MethodOutcome = std::result::Result<Vec<u8>, RemoteFailure>;

pub(crate) type Invoker =
    Arc<dyn Fn(Vec<Argument>) -> BoxFuture<'static, MethodOutcome> + Send + Sync>;

/// A method is identified by its name together with its declared parameter
/// types, so overloads can live side by side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub name: String,
    pub signature: Vec<String>,
}

impl MethodKey {
    pub fn new(name: impl Into<String>, signature: Vec<String>) -> Self {
        Self {
            name: name.into(),
            signature,
        }
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.signature.join(", "))
    }
}

/// One exposed service: an interface name, an optional version, and the
/// methods callable on it.
///
/// ```
/// use switchboard_server::ServiceDefinition;
///
/// let greeter = ServiceDefinition::new("demo.Greeter")
///     .version("1.0")
///     .method("greet", |(name,): (String,)| async move {
///         Ok::<_, String>(format!("hello {}", name))
///     });
/// assert_eq!(greeter.service_key(), "demo.Greeter-1.0");
/// ```
pub struct ServiceDefinition<C: Codec = BincodeCodec> {
    interface: String,
    version: Option<String>,
    methods: HashMap<MethodKey, Invoker>,
    codec: C,
}

impl ServiceDefinition<BincodeCodec> {
    pub fn new(interface: impl Into<String>) -> Self {
        Self::with_codec(interface, BincodeCodec)
    }
}

impl<C: Codec> ServiceDefinition<C> {
    pub fn with_codec(interface: impl Into<String>, codec: C) -> Self {
        Self {
            interface: interface.into(),
            version: None,
            methods: HashMap::new(),
            codec,
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        let version = version.into();
        self.version = (!version.is_empty()).then_some(version);
        self
    }

    /// Register `handler` under `name` and the parameter types of `A`.
    ///
    /// Arguments are decoded with the service's codec before the handler
    /// runs; an error returned by the handler is shipped back to the caller
    /// as an application failure. Registering the same name and signature
    /// twice keeps the later handler.
    pub fn method<A, R, E, F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        A: Arguments,
        R: Serialize + Send + 'static,
        E: fmt::Display + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let key = MethodKey::new(name, A::signature());
        let codec = self.codec.clone();

        let invoker: Invoker = Arc::new(move |arguments: Vec<Argument>| {
            let codec = codec.clone();
            let call = A::decode(&arguments, &codec).map(&handler);
            async move {
                let call = call.map_err(|e| {
                    RemoteFailure::new(FailureKind::InvalidArguments, e.to_string())
                })?;
                let value = call
                    .await
                    .map_err(|e| RemoteFailure::new(FailureKind::Application, e.to_string()))?;
                codec.encode(&value).map_err(|e| {
                    RemoteFailure::new(
                        FailureKind::Application,
                        format!("failed to encode result: {}", e),
                    )
                })
            }
            .boxed()
        });

        if self.methods.insert(key.clone(), invoker).is_some() {
            debug!(interface = %self.interface, method = %key, "replaced method handler");
        }
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn service_key(&self) -> String {
        service_key(&self.interface, self.version.as_deref())
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodKey> {
        self.methods.keys()
    }

    pub(crate) fn into_methods(self) -> HashMap<MethodKey, Invoker> {
        self.methods
    }
}
