use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use switchboard_core::{InvocationMode, Request};
use switchboard_discovery::{
    format_registration, AddressMap, DiscoveryCache, FixedDiscovery, LoadBalancePolicy,
    MemoryRegistry, RegistryDiscovery, ServiceDiscovery, ServiceRegistry, WeightedAddress,
};

fn request(interface: &str) -> Request {
    Request::new(interface, "echo", InvocationMode::Sync)
}

fn map(entries: &[(&str, &[(&str, u32)])]) -> AddressMap {
    entries
        .iter()
        .map(|(key, addresses)| {
            let list = addresses
                .iter()
                .map(|(address, weight)| WeightedAddress::new(*address, *weight))
                .collect();
            (key.to_string(), list)
        })
        .collect()
}

/// Poll until `check` holds or a second passes.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[test]
fn unknown_or_empty_service_resolves_to_nothing() {
    let cache = DiscoveryCache::new(LoadBalancePolicy::Random);
    cache.set_address_cache(map(&[("demo.Empty", &[]), ("demo.Echo", &[("A", 1)])]));

    assert_eq!(cache.discover("demo.Missing", &request("demo.Missing")), None);
    assert_eq!(cache.discover("demo.Empty", &request("demo.Empty")), None);
    assert_eq!(
        cache.discover("demo.Echo", &request("demo.Echo")).as_deref(),
        Some("A")
    );
}

#[test]
fn replace_drops_stale_addresses() {
    let cache = DiscoveryCache::new(LoadBalancePolicy::RoundRobin);
    cache.set_address_cache(map(&[("demo.Echo", &[("A", 1), ("B", 1)])]));
    cache.set_address_cache(map(&[("demo.Echo", &[("B", 1)])]));

    for _ in 0..4 {
        assert_eq!(
            cache.discover("demo.Echo", &request("demo.Echo")).as_deref(),
            Some("B")
        );
    }
    assert_eq!(cache.candidates("demo.Echo"), vec![WeightedAddress::new("B", 1)]);
}

#[test]
fn readers_never_see_a_half_replaced_map() {
    let cache = Arc::new(DiscoveryCache::new(LoadBalancePolicy::Random));
    let old = map(&[("demo.Echo", &[("A", 1)]), ("demo.Legacy", &[("L", 1)])]);
    let new = map(&[("demo.Echo", &[("B", 1)]), ("demo.Fresh", &[("F", 1)])]);
    cache.set_address_cache(old.clone());

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            let done = done.clone();
            std::thread::spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    let snapshot = cache.snapshot();
                    match snapshot["demo.Echo"][0].address.as_str() {
                        "A" => {
                            assert!(snapshot.contains_key("demo.Legacy"));
                            assert!(!snapshot.contains_key("demo.Fresh"));
                        }
                        "B" => {
                            assert!(snapshot.contains_key("demo.Fresh"));
                            assert!(!snapshot.contains_key("demo.Legacy"));
                        }
                        other => panic!("unexpected address {}", other),
                    }
                }
            })
        })
        .collect();

    for i in 0..2000 {
        let next = if i % 2 == 0 { new.clone() } else { old.clone() };
        cache.set_address_cache(next);
    }
    done.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }
}

#[tokio::test]
async fn fixed_discovery_ignores_service_key() {
    let discovery =
        FixedDiscovery::new(["127.0.0.1:7001", "127.0.0.1:7002", " ", "127.0.0.1:7001"]);
    assert_eq!(discovery.addresses().len(), 2);
    assert!(discovery.addresses().iter().all(|a| a.weight == 1));

    for key in ["demo.Echo", "anything-2.0"] {
        let address = discovery.discover(key, &request(key)).unwrap();
        assert!(address == "127.0.0.1:7001" || address == "127.0.0.1:7002");
    }

    let empty = FixedDiscovery::new(Vec::<String>::new());
    assert_eq!(empty.discover("demo.Echo", &request("demo.Echo")), None);
    assert!(empty.cache().snapshot().is_empty());
    discovery.stop().await;
}

#[tokio::test]
async fn fixed_discovery_feeds_cache_and_honours_policy() {
    let discovery = FixedDiscovery::new(["127.0.0.1:7001", "127.0.0.1:7002"])
        .policy(LoadBalancePolicy::RoundRobin);
    assert_eq!(discovery.cache().policy(), Some(LoadBalancePolicy::RoundRobin));
    assert!(discovery.cache().candidates("demo.Echo").is_empty());

    let picks: Vec<String> = (0..4)
        .map(|_| discovery.discover("demo.Echo", &request("demo.Echo")).unwrap())
        .collect();
    assert_eq!(
        picks,
        vec!["127.0.0.1:7001", "127.0.0.1:7002", "127.0.0.1:7001", "127.0.0.1:7002"]
    );

    let candidates = discovery.cache().candidates("demo.Echo");
    assert_eq!(candidates.len(), 2);
    assert!(candidates.iter().all(|a| a.weight == 1));

    discovery.stop().await;
    assert!(discovery.cache().snapshot().is_empty());
}

#[test]
fn cache_insert_keeps_other_keys() {
    let cache = DiscoveryCache::new(LoadBalancePolicy::RoundRobin);
    cache.set_address_cache(map(&[("a", &[("10.0.0.1:1", 1)])]));
    cache.insert("b", vec![WeightedAddress::new("10.0.0.2:1", 1)]);

    assert_eq!(cache.candidates("a").len(), 1);
    assert_eq!(cache.candidates("b")[0].address, "10.0.0.2:1");
}

#[tokio::test]
async fn registry_discovery_follows_membership() {
    let registry = MemoryRegistry::new();
    let first = registry.session();
    first
        .register_service("demo.Echo", &format_registration("127.0.0.1:7001", 1))
        .await
        .unwrap();

    let discovery =
        RegistryDiscovery::start(Arc::new(registry.clone()), LoadBalancePolicy::RoundRobin)
            .await
            .unwrap();
    assert_eq!(
        discovery.discover("demo.Echo", &request("demo.Echo")).as_deref(),
        Some("127.0.0.1:7001")
    );

    let second = registry.session();
    second
        .register_service("demo.Echo", "127.0.0.1:7002|3")
        .await
        .unwrap();
    assert!(eventually(|| discovery.cache().candidates("demo.Echo").len() == 2).await);
    assert_eq!(
        discovery.cache().candidates("demo.Echo")[1],
        WeightedAddress::new("127.0.0.1:7002", 3)
    );

    // Ephemeral entries leave with their session.
    first.stop().await.unwrap();
    assert!(eventually(|| discovery.cache().candidates("demo.Echo").len() == 1).await);
    for _ in 0..3 {
        assert_eq!(
            discovery.discover("demo.Echo", &request("demo.Echo")).as_deref(),
            Some("127.0.0.1:7002")
        );
    }
    assert!(first
        .register_service("demo.Echo", "127.0.0.1:7001|1")
        .await
        .is_err());

    discovery.stop().await;
    assert_eq!(discovery.discover("demo.Echo", &request("demo.Echo")), None);
}

#[tokio::test]
async fn session_loss_clears_and_reannouncement_restores() {
    let registry = MemoryRegistry::new();
    let session = registry.session();
    session.register_service("demo.Echo", "127.0.0.1:7001").await.unwrap();
    session.register_node("provider", "127.0.0.1:7001").await.unwrap();

    let discovery =
        RegistryDiscovery::start(Arc::new(registry.clone()), LoadBalancePolicy::Random)
            .await
            .unwrap();
    assert!(discovery.discover("demo.Echo", &request("demo.Echo")).is_some());

    registry.expire_sessions();
    assert!(registry.nodes("provider").is_empty());
    assert!(eventually(|| discovery.discover("demo.Echo", &request("demo.Echo")).is_none()).await);

    session.register_service("demo.Echo", "127.0.0.1:7001").await.unwrap();
    assert!(eventually(|| discovery.discover("demo.Echo", &request("demo.Echo")).is_some()).await);
    assert_eq!(registry.registrations("demo.Echo"), vec!["127.0.0.1:7001".to_string()]);
}

#[tokio::test]
async fn malformed_registration_is_rejected() {
    let registry = MemoryRegistry::new();
    let session = registry.session();
    assert!(session.register_service("demo.Echo", "127.0.0.1:7001|0").await.is_err());
    assert!(registry.registrations("demo.Echo").is_empty());
}

#[tokio::test]
async fn repeated_registration_keeps_one_entry() {
    let registry = MemoryRegistry::new();
    let first = registry.session();
    let second = registry.session();
    for _ in 0..2 {
        first.register_service("demo.Echo", "127.0.0.1:7001").await.unwrap();
        first.register_node("provider", "127.0.0.1:7001").await.unwrap();
    }
    second.register_service("demo.Echo", "127.0.0.1:7001").await.unwrap();

    assert_eq!(registry.registrations("demo.Echo").len(), 2);
    assert_eq!(registry.nodes("provider"), vec!["127.0.0.1:7001".to_string()]);
}
