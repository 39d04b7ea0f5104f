//! Load-balancing policies choosing one address per call.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use rand::Rng;

use switchboard_core::error::{Error, Result};
use switchboard_core::message::Request;

use crate::WeightedAddress;

/// Picks one address out of the candidates registered for a service.
///
/// Returns `None` only when there is nothing to pick from.
pub trait LoadBalancer: Send + Sync + 'static {
    fn select(&self, candidates: &[WeightedAddress], request: &Request) -> Option<String>;
}

/// The policy a discovery cache uses for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadBalancePolicy {
    Random,
    #[default]
    RoundRobin,
    WeightedRandom,
    WeightedRoundRobin,
    /// Same caller, same address.
    AddressHash,
}

impl LoadBalancePolicy {
    pub fn build(self) -> Arc<dyn LoadBalancer> {
        match self {
            Self::Random => Arc::new(RandomBalancer::new(false)),
            Self::RoundRobin => Arc::new(RoundRobinBalancer::new(false)),
            Self::WeightedRandom => Arc::new(RandomBalancer::new(true)),
            Self::WeightedRoundRobin => Arc::new(RoundRobinBalancer::new(true)),
            Self::AddressHash => Arc::new(AddressHashBalancer),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Random => "random",
            Self::RoundRobin => "round-robin",
            Self::WeightedRandom => "weighted-random",
            Self::WeightedRoundRobin => "weighted-round-robin",
            Self::AddressHash => "address-hash",
        }
    }
}

impl fmt::Display for LoadBalancePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadBalancePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "random" => Ok(Self::Random),
            "round-robin" | "roundrobin" => Ok(Self::RoundRobin),
            "weighted-random" | "weight-random" => Ok(Self::WeightedRandom),
            "weighted-round-robin" | "weight-round-robin" => Ok(Self::WeightedRoundRobin),
            "address-hash" | "ip-hash" => Ok(Self::AddressHash),
            other => Err(Error::custom(format!(
                "unknown load balance policy: {}",
                other
            ))),
        }
    }
}

/// Flatten candidates into the list a policy indexes into. With `weighted`
/// an address appears once per unit of weight, otherwise exactly once.
fn expand(candidates: &[WeightedAddress], weighted: bool) -> Vec<&str> {
    if !weighted {
        return candidates.iter().map(|c| c.address.as_str()).collect();
    }
    candidates
        .iter()
        .flat_map(|c| std::iter::repeat(c.address.as_str()).take(c.weight as usize))
        .collect()
}

/// Uniform pick over the (optionally weight-expanded) candidate list.
#[derive(Debug)]
pub struct RandomBalancer {
    weighted: bool,
}

impl RandomBalancer {
    pub fn new(weighted: bool) -> Self {
        Self { weighted }
    }
}

impl LoadBalancer for RandomBalancer {
    fn select(&self, candidates: &[WeightedAddress], _request: &Request) -> Option<String> {
        let servers = expand(candidates, self.weighted);
        match servers.len() {
            0 => None,
            1 => Some(servers[0].to_string()),
            len => Some(servers[rand::thread_rng().gen_range(0..len)].to_string()),
        }
    }
}

/// Cycles through the candidate list with one cursor shared by every
/// service key.
#[derive(Debug)]
pub struct RoundRobinBalancer {
    weighted: bool,
    position: Mutex<usize>,
}

impl RoundRobinBalancer {
    pub fn new(weighted: bool) -> Self {
        Self {
            weighted,
            position: Mutex::new(0),
        }
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn select(&self, candidates: &[WeightedAddress], _request: &Request) -> Option<String> {
        let servers = expand(candidates, self.weighted);
        if servers.is_empty() {
            return None;
        }

        let mut position = self.position.lock().unwrap_or_else(|e| e.into_inner());
        // The list may have shrunk since the last pick.
        if *position >= servers.len() {
            *position = 0;
        }
        let address = servers[*position].to_string();
        *position += 1;
        Some(address)
    }
}

/// Hashes the caller's origin (falling back to its session id, then the
/// interface name) onto the distinct candidate list.
#[derive(Debug, Default)]
pub struct AddressHashBalancer;

impl AddressHashBalancer {
    fn affinity_key(request: &Request) -> &str {
        request
            .caller
            .origin
            .as_deref()
            .or(request.caller.session_id.as_deref())
            .unwrap_or(request.interface.as_str())
    }
}

impl LoadBalancer for AddressHashBalancer {
    fn select(&self, candidates: &[WeightedAddress], request: &Request) -> Option<String> {
        let servers = expand(candidates, false);
        match servers.len() {
            0 => None,
            1 => Some(servers[0].to_string()),
            len => {
                let mut hasher = DefaultHasher::new();
                Self::affinity_key(request).hash(&mut hasher);
                let index = (hasher.finish() % len as u64) as usize;
                Some(servers[index].to_string())
            }
        }
    }
}
