use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use switchboard_core::error::Result;
use switchboard_core::message::Request;

use crate::balance::LoadBalancePolicy;
use crate::cache::DiscoveryCache;
use crate::registry::{AddressMap, ServiceDiscovery, SessionEvent, SnapshotSource};

/// Discovery kept in sync with a live registry.
///
/// Takes a full snapshot on start and again after every membership change,
/// replacing the cache wholesale each time. After the registry session comes
/// back from an outage the subscription is renewed and the snapshot retaken.
pub struct RegistryDiscovery {
    cache: Arc<DiscoveryCache>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl RegistryDiscovery {
    /// Load the current membership and start following changes.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(
        source: Arc<dyn SnapshotSource>,
        policy: LoadBalancePolicy,
    ) -> Result<Self> {
        let cache = Arc::new(DiscoveryCache::new(policy));

        // Subscribe before the first snapshot so no change slips in between.
        let changes = source.subscribe();
        let events = source.session_events();
        let initial = source.snapshot().await?;
        apply(&cache, initial);

        let watcher = tokio::spawn(follow(source, cache.clone(), changes, events));
        info!(%policy, "service discovery started");

        Ok(Self {
            cache,
            watcher: Mutex::new(Some(watcher)),
        })
    }

    pub fn cache(&self) -> &Arc<DiscoveryCache> {
        &self.cache
    }
}

async fn follow(
    source: Arc<dyn SnapshotSource>,
    cache: Arc<DiscoveryCache>,
    mut changes: watch::Receiver<u64>,
    mut events: broadcast::Receiver<SessionEvent>,
) {
    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    debug!("registry change feed closed");
                    break;
                }
                refresh(source.as_ref(), &cache).await;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Reconnected) => {
                    info!("registry session reconnected, subscribing again");
                    changes = source.subscribe();
                    refresh(source.as_ref(), &cache).await;
                }
                Ok(SessionEvent::Lost) => {
                    warn!("registry session lost, serving last known addresses");
                }
                Ok(SessionEvent::Connected) => {}
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "missed registry session events");
                    refresh(source.as_ref(), &cache).await;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

async fn refresh(source: &dyn SnapshotSource, cache: &DiscoveryCache) {
    match source.snapshot().await {
        Ok(addresses) => apply(cache, addresses),
        Err(e) => warn!(error = %e, "failed to refresh service addresses, keeping previous ones"),
    }
}

fn apply(cache: &DiscoveryCache, addresses: AddressMap) {
    let mut keys: Vec<&String> = addresses.keys().collect();
    keys.sort();
    for key in keys {
        let candidates = &addresses[key];
        if candidates.is_empty() {
            warn!(service_key = %key, "subscribed service has no available address");
        } else {
            let listed: Vec<String> = candidates.iter().map(|a| a.to_string()).collect();
            info!(service_key = %key, addresses = ?listed, "subscribed service");
        }
    }
    info!(services = addresses.len(), "refreshed service addresses");
    cache.set_address_cache(addresses);
}

#[async_trait]
impl ServiceDiscovery for RegistryDiscovery {
    fn discover(&self, service_key: &str, request: &Request) -> Option<String> {
        self.cache.discover(service_key, request)
    }

    async fn stop(&self) {
        let watcher = self
            .watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(watcher) = watcher {
            watcher.abort();
            let _ = watcher.await;
        }
        self.cache.clear();
        info!("service discovery stopped");
    }
}

impl Drop for RegistryDiscovery {
    fn drop(&mut self) {
        if let Ok(mut watcher) = self.watcher.lock() {
            if let Some(watcher) = watcher.take() {
                watcher.abort();
            }
        }
    }
}
