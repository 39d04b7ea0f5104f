//! Switchboard Fabric - Transport layer for the RPC engine
//!
//! Provides length-prefixed envelope framing over TCP, persistent client
//! channels that demultiplex responses by request id, and bounded
//! per-address channel pools.
//!
//! # Example
//!
//! ```no_run
//! use switchboard_core::{InvocationMode, Request};
//! use switchboard_fabric::{ChannelPool, PoolConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = ChannelPool::new(PoolConfig::default());
//!
//! let channel = pool.acquire("127.0.0.1:8080").await?;
//! let request = Request::new("demo.Echo", "ping", InvocationMode::Sync);
//! let bytes = channel.call(request, None, None).await?;
//! channel.release();
//!
//! pool.close().await;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod frame;
pub mod pending;
pub mod pool;
pub mod transport;

// Re-exports for convenience
pub use channel::Channel;
pub use config::PoolConfig;
pub use frame::{ClientCodec, EnvelopeCodec, ServerCodec, FRAME_SIZE_LIMIT};
pub use pending::{PendingCalls, ResultHandle, ResultWaiter};
pub use pool::{ChannelPool, PooledChannel};
pub use switchboard_core::error::{Error, Result};
