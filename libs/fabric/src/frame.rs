//! Length-prefixed envelope framing.
//!
//! Every frame is a 4-byte big-endian payload length followed by the payload
//! produced by the payload [`Codec`]. The decoder is incremental: a short
//! buffer is never an error, it just waits for more bytes.

use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use switchboard_core::codec::{BincodeCodec, Codec};
use switchboard_core::error::{Error, Result};
use switchboard_core::message::{Request, Response};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX: usize = 4;

/// Largest payload accepted in either direction (100MB to prevent DOS).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Largest payload the length prefix can describe.
pub const FRAME_SIZE_LIMIT: usize = u32::MAX as usize;

/// Frames decoding `In` envelopes and encoding `Out` envelopes.
///
/// The envelope types are fixed per side of a connection: a client reads
/// [`Response`]s and writes [`Request`]s, a server the reverse.
pub struct EnvelopeCodec<In, Out, C = BincodeCodec> {
    codec: C,
    max_frame_size: usize,
    _marker: PhantomData<fn(Out) -> In>,
}

/// Client side: decode responses, encode requests.
pub type ClientCodec<C = BincodeCodec> = EnvelopeCodec<Response, Request, C>;

/// Server side: decode requests, encode responses.
pub type ServerCodec<C = BincodeCodec> = EnvelopeCodec<Request, Response, C>;

impl<In, Out, C: Codec> EnvelopeCodec<In, Out, C> {
    pub fn new(codec: C) -> Self {
        Self {
            codec,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            _marker: PhantomData,
        }
    }

    /// Capped at [`FRAME_SIZE_LIMIT`].
    pub fn max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size.min(FRAME_SIZE_LIMIT);
        self
    }

    pub fn frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub fn payload_codec(&self) -> &C {
        &self.codec
    }
}

impl<In, Out, C: Codec + Default> Default for EnvelopeCodec<In, Out, C> {
    fn default() -> Self {
        Self::new(C::default())
    }
}

impl<In, Out, C: Codec> Clone for EnvelopeCodec<In, Out, C> {
    fn clone(&self) -> Self {
        Self {
            codec: self.codec.clone(),
            max_frame_size: self.max_frame_size,
            _marker: PhantomData,
        }
    }
}

impl<In, Out, C> Decoder for EnvelopeCodec<In, Out, C>
where
    In: DeserializeOwned,
    C: Codec,
{
    type Item = In;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<In>> {
        if src.len() < LENGTH_PREFIX {
            return Ok(None);
        }

        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&src[..LENGTH_PREFIX]);
        let len = u32::from_be_bytes(prefix) as usize;

        if len > self.max_frame_size {
            return Err(Error::InvalidFrame(format!(
                "Message too large: {} bytes",
                len
            )));
        }

        if src.len() < LENGTH_PREFIX + len {
            src.reserve(LENGTH_PREFIX + len - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX);
        let payload = src.split_to(len);
        self.codec.decode(&payload).map(Some)
    }
}

impl<In, Out, C> Encoder<Out> for EnvelopeCodec<In, Out, C>
where
    Out: Serialize,
    C: Codec,
{
    type Error = Error;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<()> {
        let payload = self.codec.encode(&item)?;
        if payload.len() > self.max_frame_size {
            return Err(Error::InvalidFrame(format!(
                "Message too large: {} bytes",
                payload.len()
            )));
        }

        // The size check above keeps this in range.
        let len = u32::try_from(payload.len()).map_err(|_| {
            Error::InvalidFrame(format!("Message too large: {} bytes", payload.len()))
        })?;
        dst.reserve(LENGTH_PREFIX + payload.len());
        dst.put_u32(len);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}
