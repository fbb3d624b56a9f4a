//! Broadcast hub: one snapshot, every client
//!
//! The hub owns the set of live client queues and the last published payload.
//! Each snapshot is serialized exactly once; every registered client gets a
//! clone of the same bytes. Sends never block: a client whose queue is full
//! simply misses that snapshot.

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use metro_clock::ProviderEvent;
use metro_core::StateSnapshot;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Utf8Bytes;

use crate::sampler::ClockSampler;

/// Serialized snapshot, shared between client queues without copying
pub type Payload = Utf8Bytes;

/// Identifier of one client connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The hub's side of a client connection: its outbound queue
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    tx: mpsc::Sender<Payload>,
}

impl ClientHandle {
    pub fn new(id: ConnectionId, peer: Option<SocketAddr>, tx: mpsc::Sender<Payload>) -> Self {
        Self { id, peer, tx }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Queue a payload without waiting.
    fn offer(&self, payload: &Payload) -> bool {
        match self.tx.try_send(payload.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::debug!("[Hub] Client {} queue full, skipping snapshot", self.id);
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("[Hub] Client {} queue closed", self.id);
                false
            }
        }
    }
}

/// Per-broadcast delivery counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub skipped: usize,
}

/// Fan-out of snapshots to all registered clients
pub struct BroadcastHub {
    clients: RwLock<HashMap<ConnectionId, ClientHandle>>,
    latest: Mutex<Option<Payload>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            latest: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate an id for a new connection.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Add a client and hand it the latest published snapshot, if any.
    pub fn register(&self, client: ClientHandle) {
        let id = client.id();
        let peer = client.peer();
        // Hold the registry while reading `latest` so a concurrent publish
        // either lands before (and is seen here) or waits and reaches us.
        let mut clients = self.clients.write();
        if let Some(payload) = self.latest.lock().as_ref() {
            client.offer(payload);
        }
        clients.insert(id, client);
        match peer {
            Some(peer) => {
                log::debug!("[Hub] Registered {} from {} ({} clients)", id, peer, clients.len())
            }
            None => log::debug!("[Hub] Registered {} ({} clients)", id, clients.len()),
        }
    }

    /// Remove a client. Returns false if it was not registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let mut clients = self.clients.write();
        let removed = clients.remove(&id).is_some();
        if removed {
            log::debug!("[Hub] Unregistered {} ({} clients)", id, clients.len());
        }
        removed
    }

    /// Serialize `snapshot` once and queue it for every client.
    pub fn broadcast(&self, snapshot: &StateSnapshot) -> BroadcastReport {
        let payload: Payload = match snapshot.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                log::error!("[Hub] Failed to serialize snapshot: {}", e);
                return BroadcastReport::default();
            }
        };
        self.publish(payload)
    }

    /// Queue an already serialized payload for every client.
    pub fn publish(&self, payload: Payload) -> BroadcastReport {
        *self.latest.lock() = Some(payload.clone());

        let clients = self.clients.read();
        let mut report = BroadcastReport::default();
        for client in clients.values() {
            if client.offer(&payload) {
                report.delivered += 1;
            } else {
                report.skipped += 1;
            }
        }
        report
    }

    /// Last payload handed to [`publish`](Self::publish)
    pub fn latest(&self) -> Option<Payload> {
        self.latest.lock().clone()
    }

    pub fn client_count(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.clients.read().contains_key(&id)
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT PUSH
// ═══════════════════════════════════════════════════════════════════════════════

/// Broadcast a fresh snapshot on every provider event until `shutdown` fires.
pub async fn push_on_events(
    hub: Arc<BroadcastHub>,
    sampler: Arc<ClockSampler>,
    mut events: broadcast::Receiver<ProviderEvent>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    log::info!("[Hub] Clock {}", event);
                    sampler.sample_and_broadcast(&hub);
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    log::warn!("[Hub] Missed {} clock events", missed);
                    sampler.sample_and_broadcast(&hub);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    log::debug!("[Hub] Clock event channel closed");
                    break;
                }
            },
            _ = shutdown.recv() => break,
        }
    }
}
