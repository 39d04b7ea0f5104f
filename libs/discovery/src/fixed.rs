use async_trait::async_trait;
use tracing::{debug, info};

use switchboard_core::message::Request;

use crate::balance::LoadBalancePolicy;
use crate::cache::DiscoveryCache;
use crate::registry::{ServiceDiscovery, WeightedAddress, DEFAULT_WEIGHT};

/// Discovery over a static address list, bypassing any registry.
///
/// Every service key resolves against the same list, fed into a
/// [`DiscoveryCache`] with the default weight the first time the key is
/// asked for. Addresses are picked at random unless another policy is set.
pub struct FixedDiscovery {
    addresses: Vec<WeightedAddress>,
    cache: DiscoveryCache,
}

impl FixedDiscovery {
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list: Vec<WeightedAddress> = Vec::new();
        for address in addresses {
            let owned: String = address.into();
            let address = owned.trim();
            if address.is_empty() || list.iter().any(|a| a.address == address) {
                continue;
            }
            list.push(WeightedAddress::new(address, DEFAULT_WEIGHT));
        }
        info!(
            addresses = ?list.iter().map(|a| a.address.as_str()).collect::<Vec<_>>(),
            "using fixed service addresses"
        );

        Self {
            addresses: list,
            cache: DiscoveryCache::new(LoadBalancePolicy::Random),
        }
    }

    /// Pick with `policy` instead. Keys seen so far are forgotten and
    /// filled in again on their next lookup.
    pub fn policy(mut self, policy: LoadBalancePolicy) -> Self {
        self.cache = DiscoveryCache::new(policy);
        self
    }

    pub fn addresses(&self) -> &[WeightedAddress] {
        &self.addresses
    }

    pub fn cache(&self) -> &DiscoveryCache {
        &self.cache
    }
}

#[async_trait]
impl ServiceDiscovery for FixedDiscovery {
    fn discover(&self, service_key: &str, request: &Request) -> Option<String> {
        if self.addresses.is_empty() {
            return None;
        }
        if let Some(address) = self.cache.discover(service_key, request) {
            return Some(address);
        }
        debug!(%service_key, "seeding fixed addresses for service");
        self.cache.insert(service_key, self.addresses.clone());
        self.cache.discover(service_key, request)
    }

    async fn stop(&self) {
        self.cache.clear();
    }
}
