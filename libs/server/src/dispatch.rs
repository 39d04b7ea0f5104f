use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tracing::{debug, error, warn};

use switchboard_core::arguments::Argument;
use switchboard_core::codec::Codec;
use switchboard_core::error::{Error, Result};
use switchboard_core::message::{FailureKind, RemoteFailure, Request, Response};

use crate::service::{Invoker, MethodKey, MethodOutcome, ServiceDefinition};

struct ServiceEntry {
    interface: String,
    methods: HashMap<MethodKey, Invoker>,
}

/// Dispatch table from service key and method key to invoker, fixed once
/// the server starts.
#[derive(Default)]
pub struct ServiceTable {
    services: HashMap<String, ServiceEntry>,
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a service. A second service under the same key is rejected.
    pub fn insert<C: Codec>(&mut self, definition: ServiceDefinition<C>) -> Result<()> {
        let key = definition.service_key();
        if self.services.contains_key(&key) {
            return Err(Error::custom(format!("service {} is already registered", key)));
        }

        let interface = definition.interface().to_string();
        let methods = definition.into_methods();
        debug!(service_key = %key, methods = methods.len(), "registered service");
        self.services.insert(key, ServiceEntry { interface, methods });
        Ok(())
    }

    pub fn contains(&self, service_key: &str) -> bool {
        self.services.contains_key(service_key)
    }

    pub fn service_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.services.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Run one request through the table.
    ///
    /// Every failure inside service logic, panics included, comes back as a
    /// failure response. Returns `None` for fire-and-forget requests, which
    /// never get a reply.
    pub async fn handle(&self, mut request: Request) -> Option<Response> {
        let arguments = std::mem::take(&mut request.arguments);
        let outcome = self.invoke(&request, arguments).await;

        if !request.mode.expects_response() {
            if let Err(failure) = outcome {
                debug!(request_id = %request.id, %failure, "dropping failure of one-way call");
            }
            return None;
        }

        Some(match outcome {
            Ok(value) => Response::success(&request, value),
            Err(failure) => Response::failure(&request, failure),
        })
    }

    async fn invoke(&self, request: &Request, arguments: Vec<Argument>) -> MethodOutcome {
        let key = request.service_key();
        let Some(service) = self.services.get(&key) else {
            warn!(request_id = %request.id, service_key = %key, "service not found");
            return Err(RemoteFailure::new(
                FailureKind::ServiceNotFound,
                format!("service {} is not registered", key),
            ));
        };

        let method = MethodKey::new(request.method.as_str(), request.signature());
        let Some(invoker) = service.methods.get(&method) else {
            warn!(request_id = %request.id, service_key = %key, %method, "method not found");
            return Err(RemoteFailure::new(
                FailureKind::MethodNotFound,
                format!("{}.{} is not registered", service.interface, method),
            ));
        };

        let call = match std::panic::catch_unwind(AssertUnwindSafe(|| invoker(arguments))) {
            Ok(call) => call,
            Err(panic) => return Err(self.panicked(request, &method, panic)),
        };

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(failure)) => {
                error!(
                    request_id = %request.id,
                    service_key = %key,
                    %method,
                    %failure,
                    "service call failed"
                );
                Err(failure)
            }
            Err(panic) => Err(self.panicked(request, &method, panic)),
        }
    }

    fn panicked(
        &self,
        request: &Request,
        method: &MethodKey,
        panic: Box<dyn Any + Send>,
    ) -> RemoteFailure {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(
            request_id = %request.id,
            service_key = %request.service_key(),
            %method,
            panic = %message,
            "service call panicked"
        );
        RemoteFailure::new(FailureKind::Panic, message)
    }
}
