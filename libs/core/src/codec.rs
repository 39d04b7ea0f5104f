use std::any::type_name;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Payload codec used for request/response envelopes and argument values.
///
/// The wire framing never looks inside the bytes a codec produces, so any
/// serde format can be plugged in as long as both peers agree on it.
pub trait Codec: Clone + Send + Sync + 'static {
    /// Encode a value into bytes
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode bytes into a value
    fn decode<T: for<'de> Deserialize<'de>>(&self, bytes: &[u8]) -> Result<T>;
}

/// The default payload format on both ends of a connection.
///
/// Envelopes and each call argument are encoded separately, so a failure
/// names the Rust type that could not be read or written.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value)
            .map_err(|e| Error::Codec(format!("cannot encode {}: {}", type_name::<T>(), e)))
    }

    fn decode<T: for<'de> Deserialize<'de>>(&self, bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(|e| {
            Error::Codec(format!(
                "cannot decode {} from {} bytes: {}",
                type_name::<T>(),
                bytes.len(),
                e
            ))
        })
    }
}
