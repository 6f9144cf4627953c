//! Connection registry state machine.
//!
//! Plain synchronous data owned by the dispatcher task. Every method runs to
//! completion before the next hub event is looked at, which is what makes a
//! connection invisible to routing before its registration and after its
//! removal.

use std::collections::HashMap;

use tokio::sync::mpsc::error::TrySendError;

use super::{ConnectionHandle, ConnectionId, OutboundPayload, Recipient, RoutedMessage, UserId};

#[derive(Default)]
pub struct Registry {
    /// Every live connection, keyed by connection id. The only owner of each
    /// outbound sender, so removal here closes the queue.
    connections: HashMap<ConnectionId, ConnectionHandle>,
    /// Current connection per user. At most one entry per user.
    by_user: HashMap<UserId, ConnectionId>,
}

/// What a single `route` call did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    pub delivered: Vec<ConnectionId>,
    pub evicted: Vec<ConnectionId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. A newer connection for the same user takes over the
    /// index entry; the older one stays in the set until it goes away itself.
    pub fn register(&mut self, handle: ConnectionHandle) {
        let id = handle.id;
        let user_id = handle.user_id;

        if let Some(previous) = self.by_user.insert(user_id, id) {
            if previous != id {
                tracing::debug!(
                    user_id,
                    previous = %previous,
                    connection_id = %id,
                    "User index moved to newer connection"
                );
            }
        }
        self.connections.insert(id, handle);

        tracing::info!(
            user_id,
            connection_id = %id,
            connections = self.connections.len(),
            "Client registered"
        );
    }

    /// Remove a connection and close its queue. Returns false when it was
    /// already gone (unregistered or evicted), which is not an error.
    pub fn unregister(&mut self, id: ConnectionId) -> bool {
        match self.remove(id) {
            Some(handle) => {
                tracing::info!(
                    user_id = handle.user_id,
                    connection_id = %id,
                    connections = self.connections.len(),
                    "Client unregistered"
                );
                true
            }
            None => false,
        }
    }

    /// Enqueue `payload` for the message's audience without ever waiting.
    /// A connection that cannot take the payload right now is evicted.
    pub fn route(&mut self, message: &RoutedMessage, payload: &OutboundPayload) -> RouteOutcome {
        let targets: Vec<ConnectionId> = match message.recipient {
            Recipient::Broadcast => self.connections.keys().copied().collect(),
            Recipient::User(recipient) => {
                let mut targets = Vec::with_capacity(2);
                for user_id in [message.sender_id, recipient] {
                    if let Some(id) = self.by_user.get(&user_id) {
                        if !targets.contains(id) {
                            targets.push(*id);
                        }
                    }
                }
                targets
            }
        };

        let mut outcome = RouteOutcome::default();
        for id in targets {
            let Some(handle) = self.connections.get(&id) else {
                continue;
            };
            match handle.outbound.try_send(payload.clone()) {
                Ok(()) => outcome.delivered.push(id),
                Err(err) => {
                    let reason = match err {
                        TrySendError::Full(_) => "outbound queue full",
                        TrySendError::Closed(_) => "outbound queue closed",
                    };
                    if let Some(handle) = self.remove(id) {
                        tracing::warn!(
                            user_id = handle.user_id,
                            connection_id = %id,
                            reason,
                            "Evicting slow client"
                        );
                    }
                    outcome.evicted.push(id);
                }
            }
        }
        outcome
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Connection currently indexed for `user_id`.
    pub fn connection_for(&self, user_id: UserId) -> Option<ConnectionId> {
        self.by_user.get(&user_id).copied()
    }

    /// Drop the handle from the set, and from the index only if the index
    /// still points at it. Dropping the handle closes the outbound queue.
    fn remove(&mut self, id: ConnectionId) -> Option<ConnectionHandle> {
        let handle = self.connections.remove(&id)?;
        if self.by_user.get(&handle.user_id) == Some(&id) {
            self.by_user.remove(&handle.user_id);
        }
        Some(handle)
    }
}
