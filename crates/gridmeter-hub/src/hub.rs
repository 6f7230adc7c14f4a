//! ---
//! meter_section: "05-networking-external-interfaces"
//! meter_subsection: "module"
//! meter_type: "source"
//! meter_scope: "code"
//! meter_description: "Scoped live-event fan-out for connected viewers."
//! meter_version: "v0.1.0"
//! meter_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::EventFrame;
use crate::metrics::HubMetrics;

/// Identifier handed out on register; used to unregister.
pub type ConnectionId = u64;

/// Visibility class of a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionScope {
    /// Receives only events targeting this user.
    User(Uuid),
    /// Receives every event (administrative).
    Admin,
}

impl ConnectionScope {
    fn covers(&self, target_user: Uuid) -> bool {
        match self {
            ConnectionScope::Admin => true,
            ConnectionScope::User(user_id) => *user_id == target_user,
        }
    }
}

struct Registered {
    id: ConnectionId,
    scope: ConnectionScope,
    tx: mpsc::Sender<EventFrame>,
}

/// Registry of live viewer connections with scoped, fire-and-forget publish.
///
/// Each connection owns a bounded outbound queue. A connection whose queue is
/// full or closed is dropped from the registry rather than blocking the
/// publisher; a slow viewer never delays delivery to others.
pub struct BroadcastHub {
    connections: RwLock<Vec<Registered>>,
    next_id: AtomicU64,
    capacity: usize,
    metrics: Option<HubMetrics>,
}

impl BroadcastHub {
    /// Create a hub whose per-connection queues hold `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
            metrics: None,
        }
    }

    /// Attach hub metrics recorded on register/publish/drop.
    pub fn with_metrics(mut self, metrics: HubMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register a viewer connection and return its id together with the
    /// receiving end of its outbound queue. Callers must send their initial
    /// snapshot before registering so a viewer never observes an event older
    /// than the snapshot it holds.
    pub fn register(&self, scope: ConnectionScope) -> (ConnectionId, mpsc::Receiver<EventFrame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut connections = self.connections.write();
        connections.push(Registered { id, scope, tx });
        if let Some(metrics) = &self.metrics {
            metrics.set_connections(connections.len());
        }
        debug!(connection = id, ?scope, "viewer registered");
        (id, rx)
    }

    /// Remove a connection. Idempotent; unknown ids are ignored.
    pub fn unregister(&self, id: ConnectionId) {
        let mut connections = self.connections.write();
        connections.retain(|c| c.id != id);
        if let Some(metrics) = &self.metrics {
            metrics.set_connections(connections.len());
        }
        debug!(connection = id, "viewer unregistered");
    }

    /// Number of currently registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Deliver `frame` to every admin-scoped connection and to every
    /// user-scoped connection matching `target_user`. Fire-and-forget.
    pub fn publish(&self, frame: EventFrame, target_user: Uuid) {
        let targets: Vec<(ConnectionId, mpsc::Sender<EventFrame>)> = {
            self.connections
                .read()
                .iter()
                .filter(|c| c.scope.covers(target_user))
                .map(|c| (c.id, c.tx.clone()))
                .collect()
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_published(frame.kind());
        }

        let mut stale = Vec::new();
        for (id, tx) in targets {
            if let Err(err) = tx.try_send(frame.clone()) {
                match err {
                    mpsc::error::TrySendError::Full(_) => {
                        warn!(connection = id, "viewer queue full; dropping connection")
                    }
                    mpsc::error::TrySendError::Closed(_) => {
                        debug!(connection = id, "viewer queue closed; dropping connection")
                    }
                }
                stale.push(id);
            }
        }

        if !stale.is_empty() {
            let mut connections = self.connections.write();
            connections.retain(|c| !stale.contains(&c.id));
            if let Some(metrics) = &self.metrics {
                metrics.record_dropped(stale.len());
                metrics.set_connections(connections.len());
            }
        }
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("connections", &self.connection_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}
