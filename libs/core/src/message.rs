//! Request and response envelopes exchanged between client and server.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::arguments::Argument;
use crate::error::{Error, Result};

/// How the caller consumes the outcome of a call.
///
/// Carried on both envelopes: the server uses it to decide whether to reply
/// at all, the client to decide how to correlate the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvocationMode {
    /// Caller waits for the result.
    Sync,
    /// Fire-and-forget, the server never replies.
    Async,
    /// Reply is delivered to registered callbacks.
    AsyncCallback,
}

impl InvocationMode {
    pub fn expects_response(self) -> bool {
        !matches!(self, Self::Async)
    }
}

/// Optional metadata about whoever triggered the call upstream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerInfo {
    pub origin: Option<String>,
    pub session_id: Option<String>,
}

impl CallerInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Build the logical service key: the interface name, suffixed with
/// `-version` when a non-empty version is given.
pub fn service_key(interface: &str, version: Option<&str>) -> String {
    match version {
        Some(version) if !version.is_empty() => format!("{}-{}", interface, version),
        _ => interface.to_string(),
    }
}

/// A fresh random 128-bit request id rendered as lowercase hex.
pub fn next_request_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub interface: String,
    pub version: Option<String>,
    pub method: String,
    pub arguments: Vec<Argument>,
    pub mode: InvocationMode,
    pub caller: CallerInfo,
}

impl Request {
    /// Create a request with a freshly generated id and no arguments.
    pub fn new(interface: impl Into<String>, method: impl Into<String>, mode: InvocationMode) -> Self {
        Self {
            id: next_request_id(),
            interface: interface.into(),
            version: None,
            method: method.into(),
            arguments: Vec::new(),
            mode,
            caller: CallerInfo::default(),
        }
    }

    pub fn version(mut self, version: Option<String>) -> Self {
        self.version = version.filter(|v| !v.is_empty());
        self
    }

    pub fn arguments(mut self, arguments: Vec<Argument>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn caller(mut self, caller: CallerInfo) -> Self {
        self.caller = caller;
        self
    }

    pub fn service_key(&self) -> String {
        service_key(&self.interface, self.version.as_deref())
    }

    /// Declared parameter types, in order.
    pub fn signature(&self) -> Vec<String> {
        self.arguments.iter().map(|a| a.type_name.clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    ServiceNotFound,
    MethodNotFound,
    InvalidArguments,
    Application,
    Panic,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ServiceNotFound => "service not found",
            Self::MethodNotFound => "method not found",
            Self::InvalidArguments => "invalid arguments",
            Self::Application => "application error",
            Self::Panic => "service panicked",
        };
        f.write_str(name)
    }
}

/// Failure payload captured on the server and shipped back in a [`Response`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl RemoteFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: String,
    pub mode: InvocationMode,
    pub result: Option<Vec<u8>>,
    pub failure: Option<RemoteFailure>,
}

impl Response {
    pub fn success(request: &Request, value: Vec<u8>) -> Self {
        Self {
            request_id: request.id.clone(),
            mode: request.mode,
            result: Some(value),
            failure: None,
        }
    }

    pub fn failure(request: &Request, failure: RemoteFailure) -> Self {
        Self {
            request_id: request.id.clone(),
            mode: request.mode,
            result: None,
            failure: Some(failure),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }

    /// Encoded result bytes, or the captured failure as [`Error::Remote`].
    pub fn into_result(self) -> Result<Vec<u8>> {
        match self.failure {
            Some(failure) => Err(Error::Remote(failure)),
            None => Ok(self.result.unwrap_or_default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_key_appends_non_empty_version() {
        assert_eq!(service_key("demo.Echo", None), "demo.Echo");
        assert_eq!(service_key("demo.Echo", Some("")), "demo.Echo");
        assert_eq!(service_key("demo.Echo", Some("2.0")), "demo.Echo-2.0");
    }

    #[test]
    fn request_ids_are_distinct_hex() {
        let a = next_request_id();
        let b = next_request_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn failure_response_surfaces_as_remote_error() {
        let request = Request::new("demo.Echo", "echo", InvocationMode::Sync);
        let response = Response::failure(
            &request,
            RemoteFailure::new(FailureKind::Application, "boom"),
        );
        assert_eq!(response.request_id, request.id);
        assert!(response.is_failure());
        match response.into_result() {
            Err(Error::Remote(failure)) => assert_eq!(failure.message, "boom"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }
}
