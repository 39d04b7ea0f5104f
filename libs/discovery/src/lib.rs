//! Switchboard Discovery - Address resolution for the RPC engine
//!
//! Maps logical service keys to `host:port` addresses. A [`DiscoveryCache`]
//! holds the last known membership and applies a [`LoadBalancePolicy`] per
//! call; [`RegistryDiscovery`] keeps it current from a coordination store,
//! and [`FixedDiscovery`] serves a static list instead.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use switchboard_discovery::{
//!     format_registration, LoadBalancePolicy, MemoryRegistry, RegistryDiscovery,
//!     ServiceDiscovery, ServiceRegistry,
//! };
//! use switchboard_core::{InvocationMode, Request};
//!
//! # async fn example() -> switchboard_core::Result<()> {
//! let registry = MemoryRegistry::new();
//! let session = registry.session();
//! session
//!     .register_service("demo.Echo", &format_registration("127.0.0.1:7000", 2))
//!     .await?;
//!
//! let discovery =
//!     RegistryDiscovery::start(Arc::new(registry.clone()), LoadBalancePolicy::WeightedRandom)
//!         .await?;
//! let request = Request::new("demo.Echo", "echo", InvocationMode::Sync);
//! let address = discovery.discover("demo.Echo", &request);
//! # Ok(())
//! # }
//! ```

pub mod balance;
pub mod cache;
pub mod fixed;
pub mod memory;
pub mod registry;
pub mod subscriber;

// Re-exports for convenience
pub use balance::{LoadBalancePolicy, LoadBalancer};
pub use cache::DiscoveryCache;
pub use fixed::FixedDiscovery;
pub use memory::{MemoryRegistry, MemorySession};
pub use registry::{
    format_registration, parse_registration, AddressMap, ServiceDiscovery, ServiceRegistry,
    SessionEvent, SnapshotSource, WeightedAddress, DEFAULT_WEIGHT,
};
pub use subscriber::RegistryDiscovery;
