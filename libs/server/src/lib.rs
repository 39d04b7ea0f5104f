//! Switchboard Server - Service dispatch for the RPC engine
//!
//! Exposes [`ServiceDefinition`]s over TCP. Each inbound request is looked up
//! by service key, method name and declared parameter types, invoked inline
//! or on a worker pool, and answered with a success or failure response.
//! Failures inside service code never close the connection.
//!
//! # Example
//!
//! ```no_run
//! use switchboard_server::{Server, ServerConfig, ServiceDefinition};
//!
//! # async fn example() -> switchboard_core::Result<()> {
//! let echo = ServiceDefinition::new("demo.Echo")
//!     .method("echo", |(text,): (String,)| async move { Ok::<_, String>(text) });
//!
//! let server = Server::builder(ServerConfig::new("127.0.0.1:9000"))
//!     .service(echo)?
//!     .start()
//!     .await?;
//!
//! server.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatch;
pub mod server;
pub mod service;

// Re-exports for convenience
pub use config::{DispatchPolicy, ServerConfig};
pub use dispatch::ServiceTable;
pub use server::{Server, ServerBuilder};
pub use service::{MethodKey, MethodOutcome, ServiceDefinition};
