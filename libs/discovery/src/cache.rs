use std::sync::{Arc, RwLock};

use switchboard_core::message::Request;

use crate::balance::{LoadBalancePolicy, LoadBalancer};
use crate::registry::{AddressMap, WeightedAddress};

/// Last known address map plus the policy that picks from it.
///
/// Readers work on a point-in-time copy of the whole map; a refresh swaps
/// the map out in one step, so a reader sees either the old membership or
/// the new one and never a mix of both.
pub struct DiscoveryCache {
    addresses: RwLock<Arc<AddressMap>>,
    balancer: Arc<dyn LoadBalancer>,
    policy: Option<LoadBalancePolicy>,
}

impl DiscoveryCache {
    pub fn new(policy: LoadBalancePolicy) -> Self {
        Self {
            addresses: RwLock::new(Arc::new(AddressMap::new())),
            balancer: policy.build(),
            policy: Some(policy),
        }
    }

    /// Use a custom balancer instead of one of the built-in policies.
    pub fn with_balancer(balancer: Arc<dyn LoadBalancer>) -> Self {
        Self {
            addresses: RwLock::new(Arc::new(AddressMap::new())),
            balancer,
            policy: None,
        }
    }

    /// The built-in policy in use, if any.
    pub fn policy(&self) -> Option<LoadBalancePolicy> {
        self.policy
    }

    /// Pick an address for `service_key`. `None` when the key is unknown or
    /// has no live address.
    pub fn discover(&self, service_key: &str, request: &Request) -> Option<String> {
        let snapshot = self.snapshot();
        let candidates = snapshot.get(service_key)?;
        self.balancer.select(candidates, request)
    }

    /// Replace the whole map. Keys and addresses missing from `addresses`
    /// are gone as soon as this returns.
    pub fn set_address_cache(&self, addresses: AddressMap) {
        let addresses = Arc::new(addresses);
        let mut current = self.addresses.write().unwrap_or_else(|e| e.into_inner());
        *current = addresses;
    }

    /// Set the candidates of one service key, leaving every other key as
    /// it was. Readers see the map before or after the change, never during.
    pub fn insert(&self, service_key: impl Into<String>, candidates: Vec<WeightedAddress>) {
        let mut current = self.addresses.write().unwrap_or_else(|e| e.into_inner());
        let mut next = (**current).clone();
        next.insert(service_key.into(), candidates);
        *current = Arc::new(next);
    }

    pub fn clear(&self) {
        self.set_address_cache(AddressMap::new());
    }

    pub fn snapshot(&self) -> Arc<AddressMap> {
        self.addresses
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn candidates(&self, service_key: &str) -> Vec<WeightedAddress> {
        self.snapshot()
            .get(service_key)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for DiscoveryCache {
    fn default() -> Self {
        Self::new(LoadBalancePolicy::default())
    }
}
