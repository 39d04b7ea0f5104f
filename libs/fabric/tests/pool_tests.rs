mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use switchboard_core::Error;
use switchboard_fabric::{ChannelPool, PoolConfig};

use support::{echo_request, spawn_echo_peer};

#[tokio::test]
async fn released_channel_is_reused() {
    let peer = spawn_echo_peer().await;
    let address = peer.addr.to_string();
    let pool = ChannelPool::new(PoolConfig::default().max_connections(4));

    let first = pool.acquire(&address).await.unwrap();
    let first_id = first.id();
    pool.release(first);

    let second = pool.acquire(&address).await.unwrap();
    assert_eq!(second.id(), first_id);
    drop(second);

    assert_eq!(pool.live_channels(&address), 1);
    assert_eq!(peer.accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn never_exceeds_max_connections_under_load() {
    let peer = spawn_echo_peer().await;
    let address = peer.addr.to_string();
    let pool = Arc::new(ChannelPool::new(
        PoolConfig::default()
            .max_connections(3)
            .acquire_timeout(None),
    ));

    let in_use = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks = (0..24).map(|i| {
        let pool = pool.clone();
        let address = address.clone();
        let in_use = in_use.clone();
        let peak = peak.clone();
        tokio::spawn(async move {
            let channel = pool.acquire(&address).await.unwrap();
            let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);

            let payload = format!("call-{}", i);
            let bytes = channel
                .call(echo_request(&payload, 10), None, None)
                .await
                .unwrap();
            let echoed: String = bincode::deserialize(&bytes).unwrap();
            assert_eq!(echoed, payload);

            in_use.fetch_sub(1, Ordering::SeqCst);
            channel.release();
        })
    });

    for task in futures::future::join_all(tasks).await {
        task.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(pool.live_channels(&address) <= 3);
    assert!(peer.accepted.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn concurrent_first_acquire_creates_one_pool() {
    let peer = spawn_echo_peer().await;
    let address = peer.addr.to_string();
    let pool = Arc::new(ChannelPool::new(
        PoolConfig::default()
            .max_connections(2)
            .acquire_timeout(None),
    ));

    let tasks = (0..16).map(|_| {
        let pool = pool.clone();
        let address = address.clone();
        tokio::spawn(async move {
            let channel = pool.acquire(&address).await.unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
            drop(channel);
        })
    });
    for task in futures::future::join_all(tasks).await {
        task.unwrap();
    }

    assert_eq!(pool.addresses(), vec![address.clone()]);
    assert!(peer.accepted.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn acquire_times_out_when_exhausted() {
    let peer = spawn_echo_peer().await;
    let address = peer.addr.to_string();
    let pool = ChannelPool::new(
        PoolConfig::default()
            .max_connections(1)
            .acquire_timeout(Some(Duration::from_millis(50))),
    );

    let held = pool.acquire(&address).await.unwrap();
    let result = pool.acquire(&address).await;
    assert!(matches!(result, Err(Error::ChannelUnavailable(_))));

    drop(held);
    assert!(pool.acquire(&address).await.is_ok());
}

#[tokio::test]
async fn unreachable_address_is_channel_unavailable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    let pool = ChannelPool::new(PoolConfig::default());
    let result = pool.acquire(&address).await;
    assert!(matches!(result, Err(Error::ChannelUnavailable(_))));
    assert_eq!(pool.live_channels(&address), 0);
}

#[tokio::test]
async fn closed_pool_rejects_acquire_and_retires_leases() {
    let peer = spawn_echo_peer().await;
    let address = peer.addr.to_string();
    let pool = ChannelPool::new(PoolConfig::default());

    let idle = pool.acquire(&address).await.unwrap();
    let leased = pool.acquire(&address).await.unwrap();
    let leased_channel = leased.channel().clone();
    drop(idle);

    pool.close().await;
    assert!(pool.is_closed());
    assert!(matches!(pool.acquire(&address).await, Err(Error::PoolClosed)));

    // Still usable until it comes back, then it is discarded.
    assert!(leased_channel.is_open());
    leased.release();
    assert!(pool.addresses().is_empty());

    // Closing twice is harmless.
    pool.close().await;
}
