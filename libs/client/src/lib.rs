//! Switchboard Client - Caller side of the RPC engine
//!
//! A [`Client`] resolves each call's service key through a
//! [`ServiceDiscovery`](switchboard_discovery::ServiceDiscovery), leases a
//! pooled channel to the chosen address, and sends the request in one of
//! three modes: [`SyncStub`] waits for the result, [`AsyncStub`] fires and
//! forgets, and [`CallbackStub`] hands the result to [`Callback`]s.
//!
//! # Example
//!
//! ```no_run
//! use switchboard_client::{Client, ClientConfig};
//!
//! # async fn example() -> switchboard_core::Result<()> {
//! let client = Client::fixed(ClientConfig::default(), ["127.0.0.1:9000"]);
//!
//! let calculator = client.sync_stub("demo.Calculator").version("1.0");
//! let sum: i64 = calculator.call("add", (2i64, 3i64)).await?;
//! assert_eq!(sum, 5);
//!
//! client.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod callback;
pub mod client;
pub mod config;
pub mod stub;

// Re-exports for convenience
pub use callback::Callback;
pub use client::Client;
pub use config::ClientConfig;
pub use stub::{AsyncStub, CallbackStub, SyncStub};
