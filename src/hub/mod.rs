//! Live push to connected WebSocket clients.
//!
//! All registry state lives inside [`Hub::run`]. Everything else talks to it
//! through the three inboxes on [`HubHandle`]. Delivery is best-effort: a
//! client whose outbound buffer is full or closed is dropped, and it recovers
//! missed events from the notifications table on reconnect.

mod event;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use derive_more::{Display, Error};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use event::{ChapterUploadedPayload, EventType, HubEvent};

pub type ConnectionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    Regular,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientInfo {
    pub connection_id: ConnectionId,
    pub user_id: Uuid,
    pub role: Role,
}

/// The hub's end of one connection. Dropping it closes the outbound stream,
/// which makes the connection's writer close the socket.
#[derive(Debug)]
pub struct ClientHandle {
    info: ClientInfo,
    outbound: mpsc::Sender<String>,
}

impl ClientHandle {
    pub fn new(user_id: Uuid, role: Role, outbound: mpsc::Sender<String>) -> Self {
        Self {
            info: ClientInfo {
                connection_id: Uuid::new_v4(),
                user_id,
                role,
            },
            outbound,
        }
    }

    pub fn info(&self) -> ClientInfo {
        self.info
    }

    fn try_write(&self, frame: &str) -> bool {
        self.outbound.try_send(frame.to_owned()).is_ok()
    }
}

/// An event plus the single regular user (if any) that should see it besides
/// the admins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broadcast {
    pub event: HubEvent,
    pub target: Option<Uuid>,
}

#[derive(Debug, Default)]
struct Gauges {
    admins: AtomicUsize,
    regular: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionCounts {
    pub admins: usize,
    pub users: usize,
}

pub struct Hub {
    admins: HashMap<ConnectionId, ClientHandle>,
    regular: HashMap<Uuid, ClientHandle>,
    connect_rx: mpsc::Receiver<ClientHandle>,
    disconnect_rx: mpsc::Receiver<ClientInfo>,
    broadcast_rx: mpsc::Receiver<Broadcast>,
    gauges: Arc<Gauges>,
}

#[derive(Clone)]
pub struct HubHandle {
    connect_tx: mpsc::Sender<ClientHandle>,
    disconnect_tx: mpsc::Sender<ClientInfo>,
    broadcast_tx: mpsc::Sender<Broadcast>,
    gauges: Arc<Gauges>,
}

pub fn channel(capacity: usize) -> (Hub, HubHandle) {
    let (connect_tx, connect_rx) = mpsc::channel(capacity);
    let (disconnect_tx, disconnect_rx) = mpsc::channel(capacity);
    let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
    let gauges = Arc::new(Gauges::default());
    let hub = Hub {
        admins: HashMap::new(),
        regular: HashMap::new(),
        connect_rx,
        disconnect_rx,
        broadcast_rx,
        gauges: gauges.clone(),
    };
    let handle = HubHandle {
        connect_tx,
        disconnect_tx,
        broadcast_tx,
        gauges,
    };
    (hub, handle)
}

impl Hub {
    /// Serves the inboxes until every [`HubHandle`] is dropped.
    pub async fn run(mut self) {
        info!("Event hub started.");
        loop {
            // Registrations are drained before broadcasts so a client that
            // connected before an event was posted is in the registry for it.
            tokio::select! {
                biased;
                Some(client) = self.connect_rx.recv() => self.register(client),
                Some(client) = self.disconnect_rx.recv() => self.unregister(client),
                Some(broadcast) = self.broadcast_rx.recv() => self.dispatch(broadcast),
                else => break,
            }
        }
        info!("Event hub stopped.");
    }

    fn register(&mut self, client: ClientHandle) {
        let info = client.info();
        match info.role {
            Role::Admin => {
                self.admins.insert(info.connection_id, client);
            }
            Role::Regular => {
                if let Some(previous) = self.regular.insert(info.user_id, client) {
                    debug!(
                        user_id = %info.user_id,
                        connection_id = %previous.info().connection_id,
                        "Replaced existing connection for user."
                    );
                }
            }
        }
        debug!(user_id = %info.user_id, role = ?info.role, "Client connected.");
        self.publish_gauges();
    }

    fn unregister(&mut self, client: ClientInfo) {
        let removed = match client.role {
            Role::Admin => self.admins.remove(&client.connection_id),
            Role::Regular => match self.regular.get(&client.user_id) {
                Some(current) if current.info().connection_id == client.connection_id => {
                    self.regular.remove(&client.user_id)
                }
                _ => None,
            },
        };
        if removed.is_some() {
            debug!(user_id = %client.user_id, role = ?client.role, "Client disconnected.");
            self.publish_gauges();
        }
    }

    fn dispatch(&mut self, broadcast: Broadcast) {
        let frame = match broadcast.event.to_frame() {
            Ok(frame) => frame,
            Err(err) => {
                error!(error = ?err, "Failed to serialize hub event.");
                return;
            }
        };
        let mut failed = Vec::new();
        for admin in self.admins.values() {
            if !admin.try_write(&frame) {
                failed.push(admin.info());
            }
        }
        if let Some(client) = broadcast.target.and_then(|user_id| self.regular.get(&user_id)) {
            if !client.try_write(&frame) {
                failed.push(client.info());
            }
        }
        for client in failed {
            warn!(user_id = %client.user_id, "Dropping client after failed write.");
            self.unregister(client);
        }
    }

    fn publish_gauges(&self) {
        self.gauges.admins.store(self.admins.len(), Ordering::Relaxed);
        self.gauges.regular.store(self.regular.len(), Ordering::Relaxed);
    }
}

impl HubHandle {
    pub async fn connect(&self, client: ClientHandle) -> Result<(), Error> {
        self.connect_tx.send(client).await.map_err(|_| Error::Closed)
    }

    pub async fn disconnect(&self, client: ClientInfo) -> Result<(), Error> {
        self.disconnect_tx.send(client).await.map_err(|_| Error::Closed)
    }

    /// Posts without waiting. A full inbox drops the event.
    pub fn broadcast(&self, broadcast: Broadcast) -> Result<(), Error> {
        self.broadcast_tx.try_send(broadcast).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => Error::Full,
            mpsc::error::TrySendError::Closed(_) => Error::Closed,
        })
    }

    /// Registry sizes as of the hub's last registration change.
    pub fn connection_counts(&self) -> ConnectionCounts {
        ConnectionCounts {
            admins: self.gauges.admins.load(Ordering::Relaxed),
            users: self.gauges.regular.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Display, Error, PartialEq, Eq)]
pub enum Error {
    #[display(fmt = "Hub inbox is full.")]
    Full,
    #[display(fmt = "Hub has stopped.")]
    Closed,
}
