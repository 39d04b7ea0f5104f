//! Interfaces to the external coordination service.
//!
//! Servers announce themselves through a [`ServiceRegistry`]; clients resolve
//! addresses through a [`ServiceDiscovery`]. A discovery backed by a live
//! registry is fed full snapshots by a [`SnapshotSource`].

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};

use switchboard_core::error::{Error, Result};
use switchboard_core::message::Request;

/// Weight used when a registration does not carry one.
pub const DEFAULT_WEIGHT: u32 = 1;

/// One `host:port` and its relative weight.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WeightedAddress {
    pub address: String,
    pub weight: u32,
}

impl WeightedAddress {
    pub fn new(address: impl Into<String>, weight: u32) -> Self {
        Self {
            address: address.into(),
            weight,
        }
    }
}

impl fmt::Display for WeightedAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.address, self.weight)
    }
}

/// Service key to its candidate addresses, in registration order.
pub type AddressMap = HashMap<String, Vec<WeightedAddress>>;

/// Render the registry payload for one service instance: `address|weight`.
pub fn format_registration(address: &str, weight: u32) -> String {
    WeightedAddress::new(address, weight).to_string()
}

/// Parse an `address|weight` registry payload. A missing weight means
/// [`DEFAULT_WEIGHT`]; a zero or non-numeric weight is rejected.
pub fn parse_registration(data: &str) -> Result<WeightedAddress> {
    let (address, weight) = match data.split_once('|') {
        Some((address, weight)) => (address.trim(), weight.trim()),
        None => (data.trim(), ""),
    };
    if address.is_empty() {
        return Err(Error::custom(format!("registration without address: {:?}", data)));
    }

    let weight = if weight.is_empty() {
        DEFAULT_WEIGHT
    } else {
        match weight.parse::<u32>() {
            Ok(weight) if weight > 0 => weight,
            _ => {
                return Err(Error::custom(format!(
                    "invalid weight in registration: {:?}",
                    data
                )))
            }
        }
    };
    Ok(WeightedAddress::new(address, weight))
}

/// Merge raw registrations for one service key. A repeated address keeps
/// its first position and takes the last weight seen.
pub fn collect_addresses<'a>(
    registrations: impl IntoIterator<Item = &'a str>,
) -> Result<Vec<WeightedAddress>> {
    let mut addresses: Vec<WeightedAddress> = Vec::new();
    for data in registrations {
        let parsed = parse_registration(data)?;
        match addresses.iter_mut().find(|a| a.address == parsed.address) {
            Some(existing) => existing.weight = parsed.weight,
            None => addresses.push(parsed),
        }
    }
    Ok(addresses)
}

/// State changes of the session with the coordination service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Connected,
    /// The session is gone along with every ephemeral registration in it.
    Lost,
    /// A session is back. Announcements must be made again.
    Reconnected,
}

/// Server-side announcements.
#[async_trait]
pub trait ServiceRegistry: Send + Sync + 'static {
    /// Announce one instance of `service_key`. `data` is `address|weight`.
    async fn register_service(&self, service_key: &str, data: &str) -> Result<()>;

    /// Announce the process itself under `name`.
    async fn register_node(&self, name: &str, address: &str) -> Result<()>;

    fn session_events(&self) -> broadcast::Receiver<SessionEvent>;

    /// Withdraw every announcement made through this registry and end the
    /// session.
    async fn stop(&self) -> Result<()>;
}

/// Client-side address resolution.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync + 'static {
    /// One address for `service_key`, chosen by the active policy, or `None`
    /// when nothing is known for it.
    fn discover(&self, service_key: &str, request: &Request) -> Option<String>;

    async fn stop(&self);
}

/// Where a registry-backed discovery reads its snapshots from.
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    /// The full current membership of every service key.
    async fn snapshot(&self) -> Result<AddressMap>;

    /// Ticks on every membership change.
    fn subscribe(&self) -> watch::Receiver<u64>;

    fn session_events(&self) -> broadcast::Receiver<SessionEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_address_and_weight() {
        assert_eq!(
            parse_registration("10.0.0.1:9000|3").unwrap(),
            WeightedAddress::new("10.0.0.1:9000", 3)
        );
        assert_eq!(
            parse_registration("10.0.0.1:9000").unwrap(),
            WeightedAddress::new("10.0.0.1:9000", DEFAULT_WEIGHT)
        );
        assert_eq!(
            parse_registration("10.0.0.1:9000|").unwrap().weight,
            DEFAULT_WEIGHT
        );
    }

    #[test]
    fn rejects_bad_registrations() {
        assert!(parse_registration("10.0.0.1:9000|0").is_err());
        assert!(parse_registration("10.0.0.1:9000|heavy").is_err());
        assert!(parse_registration("|2").is_err());
    }

    #[test]
    fn repeated_address_keeps_position_and_last_weight() {
        let merged = collect_addresses(["a:1|1", "b:1|2", "a:1|5"]).unwrap();
        assert_eq!(
            merged,
            vec![WeightedAddress::new("a:1", 5), WeightedAddress::new("b:1", 2)]
        );
    }

    #[test]
    fn registration_text_round_trips() {
        let data = format_registration("127.0.0.1:7000", 4);
        assert_eq!(data, "127.0.0.1:7000|4");
        assert_eq!(parse_registration(&data).unwrap().weight, 4);
    }
}
