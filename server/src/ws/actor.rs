use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{interval_at, timeout, timeout_at, Instant};

use crate::config::HubConfig;
use crate::db::StoreError;
use crate::hub::{self, ConnectionId, OutboundReceiver, RoutedMessage, UserId};
use crate::state::AppState;
use crate::ws::protocol;

/// Why the read loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadExit {
    ClientClosed,
    StreamEnded,
    ReadError,
    LivenessTimeout,
}

/// Why the write loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteExit {
    QueueClosed,
    WriteFailed,
}

#[derive(Debug, thiserror::Error)]
enum WriteError {
    #[error("socket write failed: {0}")]
    Socket(#[from] axum::Error),
    #[error("write deadline exceeded")]
    Deadline,
}

#[derive(Debug, thiserror::Error)]
enum FrameError {
    #[error("sender lookup failed: {0}")]
    Lookup(StoreError),
    #[error("failed to persist message: {0}")]
    Persist(StoreError),
    #[error("storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Run one authenticated connection until either loop stops.
///
/// The socket is split: a spawned writer task drains the outbound queue and
/// sends pings, while this task reads frames. The registration guard is
/// dropped on every exit path, which unregisters the connection exactly once;
/// the dispatcher then closes the queue and the writer sends a close frame.
pub async fn run_connection(socket: WebSocket, state: AppState, user_id: UserId) {
    let settings = state.hub_config.clone();
    let (handle, outbound) = hub::new_connection(user_id, settings.outbound_buffer);
    let registration = state.hub.register(handle);
    let connection_id = registration.id();

    let (ws_sender, ws_receiver) = socket.split();

    tracing::info!(
        user_id,
        connection_id = %connection_id,
        "WebSocket connection started"
    );

    let mut writer = tokio::spawn(write_loop(ws_sender, outbound, settings.clone(), connection_id));
    let mut writer_done = false;

    tokio::select! {
        exit = read_loop(ws_receiver, &state, user_id, connection_id, settings.pong_wait()) => {
            tracing::debug!(user_id, connection_id = %connection_id, ?exit, "Read loop stopped");
        }
        exit = &mut writer => {
            writer_done = true;
            tracing::debug!(user_id, connection_id = %connection_id, ?exit, "Write loop stopped");
        }
    }

    drop(registration);

    if !writer_done && timeout(settings.write_wait(), &mut writer).await.is_err() {
        tracing::debug!(connection_id = %connection_id, "Writer did not finish in time, aborting");
        writer.abort();
    }

    tracing::info!(
        user_id,
        connection_id = %connection_id,
        "WebSocket connection stopped"
    );
}

/// Inbound loop: frames are handled strictly one after another.
async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    state: &AppState,
    user_id: UserId,
    connection_id: ConnectionId,
    pong_wait: Duration,
) -> ReadExit {
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let next = match timeout_at(deadline, receiver.next()).await {
            Ok(next) => next,
            Err(_) => {
                tracing::warn!(user_id, connection_id = %connection_id, "Pong timeout, closing connection");
                return ReadExit::LivenessTimeout;
            }
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                handle_chat_frame(state, user_id, text.as_str()).await;
            }
            Some(Ok(Message::Binary(data))) => {
                tracing::debug!(
                    user_id,
                    len = data.len(),
                    "Ignoring binary frame (chat frames are JSON text)"
                );
            }
            Some(Ok(Message::Pong(_))) => {
                deadline = Instant::now() + pong_wait;
            }
            Some(Ok(Message::Ping(_))) => {
                // tungstenite queues the pong reply itself
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::info!(user_id, reason = ?frame, "Client initiated close");
                return ReadExit::ClientClosed;
            }
            Some(Err(e)) => {
                tracing::warn!(user_id, error = %e, "WebSocket receive error");
                return ReadExit::ReadError;
            }
            None => {
                tracing::info!(user_id, "WebSocket stream ended");
                return ReadExit::StreamEnded;
            }
        }
    }
}

/// Parse, resolve, persist and route one chat frame. Every failure here is
/// logged and drops only this frame.
async fn handle_chat_frame(state: &AppState, user_id: UserId, raw: &str) {
    let envelope = match protocol::parse_inbound(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            let preview: String = raw.chars().take(100).collect();
            tracing::warn!(
                user_id,
                error = %e,
                frame = %preview,
                "Dropping malformed chat frame"
            );
            return;
        }
    };

    let store = state.store.clone();
    let created_at = Utc::now();
    let persisted = tokio::task::spawn_blocking(move || -> Result<RoutedMessage, FrameError> {
        let sender_name = store.display_name(user_id).map_err(FrameError::Lookup)?;
        let message = envelope.into_routed(user_id, sender_name, created_at);
        store.save_message(&message).map_err(FrameError::Persist)?;
        Ok(message)
    })
    .await
    .map_err(FrameError::from)
    .and_then(|result| result);

    match persisted {
        Ok(message) => state.hub.route(message),
        Err(e) => {
            tracing::warn!(user_id, error = %e, "Dropping chat frame");
        }
    }
}

/// Outbound loop: forwards queued payloads and keeps the peer alive with pings.
async fn write_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: OutboundReceiver,
    settings: HubConfig,
    connection_id: ConnectionId,
) -> WriteExit {
    let write_wait = settings.write_wait();
    let mut ping = interval_at(
        Instant::now() + settings.ping_interval(),
        settings.ping_interval(),
    );

    loop {
        tokio::select! {
            item = outbound.recv() => {
                let Some(payload) = item else {
                    // Registry dropped us: unregistered or evicted.
                    let _ = write_with_deadline(&mut sender, Message::Close(None), write_wait).await;
                    return WriteExit::QueueClosed;
                };

                if let Err(e) = forward_batch(&mut sender, &mut outbound, payload, write_wait).await {
                    tracing::debug!(connection_id = %connection_id, error = %e, "Write failed");
                    return WriteExit::WriteFailed;
                }
            }
            _ = ping.tick() => {
                if let Err(e) = write_with_deadline(&mut sender, Message::Ping(Bytes::new()), write_wait).await {
                    tracing::debug!(connection_id = %connection_id, error = %e, "Ping failed");
                    return WriteExit::WriteFailed;
                }
            }
        }
    }
}

/// Write `first` plus anything already waiting in the queue, one frame per
/// payload, then flush once.
async fn forward_batch(
    sender: &mut SplitSink<WebSocket, Message>,
    outbound: &mut OutboundReceiver,
    first: hub::OutboundPayload,
    write_wait: Duration,
) -> Result<(), WriteError> {
    feed_with_deadline(sender, Message::Text(first), write_wait).await?;
    while let Ok(payload) = outbound.try_recv() {
        feed_with_deadline(sender, Message::Text(payload), write_wait).await?;
    }
    match timeout(write_wait, sender.flush()).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(WriteError::Deadline),
    }
}

async fn feed_with_deadline(
    sender: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_wait: Duration,
) -> Result<(), WriteError> {
    match timeout(write_wait, sender.feed(message)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(WriteError::Deadline),
    }
}

async fn write_with_deadline(
    sender: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_wait: Duration,
) -> Result<(), WriteError> {
    match timeout(write_wait, sender.send(message)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(WriteError::Deadline),
    }
}
