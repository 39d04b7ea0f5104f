//! Switchboard Core - Shared data model for the RPC engine
//!
//! Holds the request/response envelopes, the typed argument model, the
//! pluggable payload codec, the error taxonomy shared by every layer, and
//! the bounded worker pool used for callbacks and offloaded dispatch.

pub mod arguments;
pub mod codec;
pub mod config;
pub mod error;
pub mod message;
pub mod worker;

// Re-exports for convenience
pub use arguments::{Argument, Arguments};
pub use codec::{BincodeCodec, Codec};
pub use error::{Error, Result};
pub use message::{
    service_key, CallerInfo, FailureKind, InvocationMode, RemoteFailure, Request, Response,
};
pub use worker::WorkerPool;
