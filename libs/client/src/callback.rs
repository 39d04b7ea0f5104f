use async_trait::async_trait;

use switchboard_core::error::Error;

/// Receives the outcome of a callback-mode call.
///
/// Exactly one of the two methods runs per call, on the client's callback
/// workers rather than on the connection's reader. A callback attached to
/// several calls is invoked once for each.
#[async_trait]
pub trait Callback<R>: Send + Sync + 'static {
    async fn success(&self, result: R);

    /// The call failed remotely, on the transport, or its result could not
    /// be decoded.
    async fn fail(&self, error: &Error);
}
