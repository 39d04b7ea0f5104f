use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::frame::EnvelopeCodec;

pub mod tcp;

pub use self::tcp::{TcpConnector, TcpTransportListener};

/// Read side of a framed connection.
pub type FrameReader<In, Out, C> = FramedRead<OwnedReadHalf, EnvelopeCodec<In, Out, C>>;

/// Write side of a framed connection.
pub type FrameWriter<In, Out, C> = FramedWrite<OwnedWriteHalf, EnvelopeCodec<In, Out, C>>;

/// Split a stream into independently owned framed halves sharing one codec
/// configuration.
pub fn framed<In, Out, C>(
    stream: TcpStream,
    codec: EnvelopeCodec<In, Out, C>,
) -> (FrameReader<In, Out, C>, FrameWriter<In, Out, C>)
where
    C: switchboard_core::Codec,
{
    let (read_half, write_half) = stream.into_split();
    (
        FramedRead::new(read_half, codec.clone()),
        FramedWrite::new(write_half, codec),
    )
}
