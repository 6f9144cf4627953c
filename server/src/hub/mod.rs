//! Real-time messaging hub.
//!
//! One dispatcher task owns the connection registry. Connections talk to it
//! only through [`HubHandle`], which turns every call into a [`HubCommand`] on
//! a single ordered stream, so the registry needs no lock.

pub mod dispatcher;
pub mod registry;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::chat::render::DeliveryRenderer;

pub use dispatcher::run_dispatcher;
pub use registry::{Registry, RouteOutcome};

/// Opaque user identity issued by the session layer.
pub type UserId = u64;

/// Rendered payload waiting in a connection's outbound queue.
pub type OutboundPayload = Utf8Bytes;

/// Sender half of a connection's bounded outbound queue. Only the registry
/// holds one; dropping it closes the queue.
pub type OutboundSender = mpsc::Sender<OutboundPayload>;

/// Receiver half of a connection's outbound queue, owned by its write loop.
pub type OutboundReceiver = mpsc::Receiver<OutboundPayload>;

/// Process-unique id of one physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Who a message is addressed to. On the wire and in storage, broadcast is 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    Broadcast,
    User(UserId),
}

impl Recipient {
    pub fn from_id(id: UserId) -> Self {
        match id {
            0 => Self::Broadcast,
            id => Self::User(id),
        }
    }

    pub fn as_id(&self) -> UserId {
        match self {
            Self::Broadcast => 0,
            Self::User(id) => *id,
        }
    }
}

/// A persisted chat message on its way to recipients. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedMessage {
    pub sender_id: UserId,
    pub sender_name: String,
    pub recipient: Recipient,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl RoutedMessage {
    /// `created_at` as stored and rendered: RFC 3339 UTC, microseconds.
    pub fn timestamp(&self) -> String {
        self.created_at.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

/// The registry's view of a live connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: UserId,
    pub outbound: OutboundSender,
}

/// Open a new outbound queue and the handle that will be registered for it.
pub fn new_connection(user_id: UserId, capacity: usize) -> (ConnectionHandle, OutboundReceiver) {
    let (outbound, rx) = mpsc::channel(capacity.max(1));
    let handle = ConnectionHandle {
        id: ConnectionId::next(),
        user_id,
        outbound,
    };
    (handle, rx)
}

/// Counts reported by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub users: usize,
}

/// Events processed, in submission order, by the dispatcher task.
#[derive(Debug)]
pub enum HubCommand {
    Register(ConnectionHandle),
    Unregister {
        id: ConnectionId,
        user_id: UserId,
    },
    Route(RoutedMessage),
    Stats(oneshot::Sender<HubStats>),
}

/// Cloneable front door to the dispatcher task.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Start the dispatcher task. The template behind `renderer` must already
    /// be loaded; it is only read from here on.
    pub fn spawn(renderer: Arc<dyn DeliveryRenderer>) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_dispatcher(rx, renderer));
        Self { commands }
    }

    /// Register a connection. The returned guard unregisters it when dropped.
    pub fn register(&self, handle: ConnectionHandle) -> Registration {
        let registration = Registration {
            hub: self.clone(),
            id: handle.id,
            user_id: handle.user_id,
        };
        self.submit(HubCommand::Register(handle));
        registration
    }

    pub fn unregister(&self, id: ConnectionId, user_id: UserId) {
        self.submit(HubCommand::Unregister { id, user_id });
    }

    pub fn route(&self, message: RoutedMessage) {
        self.submit(HubCommand::Route(message));
    }

    /// Snapshot of registry sizes, taken in order with all other events.
    pub async fn stats(&self) -> Option<HubStats> {
        let (tx, rx) = oneshot::channel();
        self.submit(HubCommand::Stats(tx));
        rx.await.ok()
    }

    fn submit(&self, command: HubCommand) {
        if self.commands.send(command).is_err() {
            tracing::warn!("Hub dispatcher is gone, dropping command");
        }
    }
}

/// Scoped registration of one connection. Dropping it submits exactly one
/// `Unregister`, whichever loop of the connection stopped first.
pub struct Registration {
    hub: HubHandle,
    id: ConnectionId,
    user_id: UserId,
}

impl Registration {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.hub.unregister(self.id, self.user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recipient_zero_is_broadcast() {
        assert_eq!(Recipient::from_id(0), Recipient::Broadcast);
        assert_eq!(Recipient::from_id(7), Recipient::User(7));
        assert_eq!(Recipient::Broadcast.as_id(), 0);
        assert_eq!(Recipient::User(7).as_id(), 7);
    }

    #[test]
    fn connection_ids_are_unique() {
        let (a, _rx_a) = new_connection(1, 1);
        let (b, _rx_b) = new_connection(1, 1);
        assert_ne!(a.id, b.id);
    }
}
