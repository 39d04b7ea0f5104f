use thiserror::Error;

use crate::message::RemoteFailure;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Discovery had no address for the service key. Raised before any
    /// connection is touched.
    #[error("Service unavailable: {service_key}")]
    ServiceUnavailable { service_key: String },

    /// No pooled connection could be obtained for a resolved address.
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    #[error("Request timed out. Request id: {request_id}, interface: {interface}, method: {method}")]
    Timeout {
        request_id: String,
        interface: String,
        method: String,
    },

    /// The call reached the service and failed there.
    #[error("Remote failure: {0}")]
    Remote(RemoteFailure),

    #[error("Connection pool closed")]
    PoolClosed,

    #[error("{0}")]
    Custom(String),
}

impl Error {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Whether this error came back from service logic rather than from the
    /// transport, pool or discovery layers.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
