//! Process-local coordination store.
//!
//! Mirrors the parts of a hierarchical coordination service the engine
//! relies on: persistent service and node paths holding ephemeral entries
//! that belong to a session and vanish with it, a change feed, and session
//! state events.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use switchboard_core::error::{Error, Result};

use crate::registry::{
    collect_addresses, parse_registration, AddressMap, ServiceRegistry, SessionEvent,
    SnapshotSource,
};

const EVENT_CAPACITY: usize = 64;

struct Ephemeral {
    session: u64,
    data: String,
}

/// Entries under one path. A session registering the same data twice
/// still owns a single entry.
trait Entries {
    fn add(&mut self, session: u64, data: &str) -> bool;
}

impl Entries for Vec<Ephemeral> {
    fn add(&mut self, session: u64, data: &str) -> bool {
        if self.iter().any(|e| e.session == session && e.data == data) {
            return false;
        }
        self.push(Ephemeral {
            session,
            data: data.to_string(),
        });
        true
    }
}

#[derive(Default)]
struct State {
    services: BTreeMap<String, Vec<Ephemeral>>,
    nodes: BTreeMap<String, Vec<Ephemeral>>,
}

impl State {
    fn drop_session(&mut self, session: Option<u64>) -> usize {
        let mut removed = 0;
        for entries in self.services.values_mut().chain(self.nodes.values_mut()) {
            let before = entries.len();
            entries.retain(|e| session.is_some_and(|s| e.session != s));
            removed += before - entries.len();
        }
        removed
    }
}

struct Store {
    state: Mutex<State>,
    revision: watch::Sender<u64>,
    events: broadcast::Sender<SessionEvent>,
    next_session: AtomicU64,
}

/// In-memory coordination store shared by servers and clients of one
/// process.
///
/// Cloning yields another handle to the same store.
#[derive(Clone)]
pub struct MemoryRegistry {
    store: Arc<Store>,
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRegistry {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store: Arc::new(Store {
                state: Mutex::new(State::default()),
                revision,
                events,
                next_session: AtomicU64::new(1),
            }),
        }
    }

    /// Open a session to announce through. Its ephemeral entries live until
    /// it is stopped or the store expires every session.
    pub fn session(&self) -> MemorySession {
        let id = self.store.next_session.fetch_add(1, Ordering::Relaxed);
        let _ = self.store.events.send(SessionEvent::Connected);
        debug!(session = id, "registry session opened");
        MemorySession {
            store: self.store.clone(),
            id,
            stopped: AtomicBool::new(false),
        }
    }

    /// Simulate an outage of the coordination service: every ephemeral
    /// entry is dropped, then sessions report that they are back.
    pub fn expire_sessions(&self) {
        let removed = self.store.lock().drop_session(None);
        warn!(removed, "registry sessions expired");
        let _ = self.store.events.send(SessionEvent::Lost);
        self.store.bump();
        let _ = self.store.events.send(SessionEvent::Reconnected);
    }

    /// Addresses currently registered under node `name`.
    pub fn nodes(&self, name: &str) -> Vec<String> {
        self.store
            .lock()
            .nodes
            .get(name)
            .map(|entries| entries.iter().map(|e| e.data.clone()).collect())
            .unwrap_or_default()
    }

    /// Raw `address|weight` entries registered under `service_key`.
    pub fn registrations(&self, service_key: &str) -> Vec<String> {
        self.store
            .lock()
            .services
            .get(service_key)
            .map(|entries| entries.iter().map(|e| e.data.clone()).collect())
            .unwrap_or_default()
    }
}

impl Store {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bump(&self) {
        self.revision.send_modify(|revision| *revision += 1);
    }
}

#[async_trait]
impl SnapshotSource for MemoryRegistry {
    async fn snapshot(&self) -> Result<AddressMap> {
        let state = self.store.lock();
        let mut addresses = AddressMap::with_capacity(state.services.len());
        for (key, entries) in &state.services {
            let collected = collect_addresses(entries.iter().map(|e| e.data.as_str()))?;
            addresses.insert(key.clone(), collected);
        }
        Ok(addresses)
    }

    fn subscribe(&self) -> watch::Receiver<u64> {
        self.store.revision.subscribe()
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.store.events.subscribe()
    }
}

/// One session against a [`MemoryRegistry`], used by a server to announce
/// its services and node.
pub struct MemorySession {
    store: Arc<Store>,
    id: u64,
    stopped: AtomicBool,
}

impl MemorySession {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn ensure_open(&self) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(Error::custom(format!("registry session {} is stopped", self.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl ServiceRegistry for MemorySession {
    async fn register_service(&self, service_key: &str, data: &str) -> Result<()> {
        self.ensure_open()?;
        parse_registration(data)?;
        let added = self
            .store
            .lock()
            .services
            .entry(service_key.to_string())
            .or_default()
            .add(self.id, data);
        if added {
            self.store.bump();
            info!(session = self.id, %service_key, %data, "registered service");
        }
        Ok(())
    }

    async fn register_node(&self, name: &str, address: &str) -> Result<()> {
        self.ensure_open()?;
        let added = self
            .store
            .lock()
            .nodes
            .entry(name.to_string())
            .or_default()
            .add(self.id, address);
        if added {
            self.store.bump();
            info!(session = self.id, %name, %address, "registered node");
        }
        Ok(())
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.store.events.subscribe()
    }

    async fn stop(&self) -> Result<()> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let removed = self.store.lock().drop_session(Some(self.id));
        self.store.bump();
        debug!(session = self.id, removed, "registry session closed");
        Ok(())
    }
}
