//! Shared harness for integration tests: a real router on a random port,
//! backed by a temporary SQLite database.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chathub_server::auth::jwt;
use chathub_server::chat::render::MessageTemplate;
use chathub_server::config::HubConfig;
use chathub_server::db::{self, SqliteStore};
use chathub_server::hub::{HubHandle, HubStats, UserId};
use chathub_server::state::AppState;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const SECRET: &[u8] = b"integration-test-secret";

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsWrite = SplitSink<WsStream, Message>;
pub type WsRead = SplitStream<WsStream>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: SqliteStore,
    pub hub: HubHandle,
    _data_dir: tempfile::TempDir,
}

pub fn test_hub_config() -> HubConfig {
    HubConfig {
        outbound_buffer: 16,
        ..HubConfig::default()
    }
}

/// Start the server on a random port and return its handles.
pub async fn start_test_server(hub_config: HubConfig) -> TestServer {
    let data_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let db = db::init_db(data_dir.path().to_str().unwrap()).expect("Failed to init DB");
    let store = SqliteStore::new(db);
    let hub = HubHandle::spawn(Arc::new(MessageTemplate::default()));

    let state = AppState {
        store: Arc::new(store.clone()),
        hub: hub.clone(),
        hub_config,
        jwt_secret: Arc::new(SECRET.to_vec()),
    };

    let app = chathub_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        store,
        hub,
        _data_dir: data_dir,
    }
}

impl TestServer {
    pub fn create_user(&self, name: &str) -> UserId {
        let email = format!("{}@example.com", name.to_lowercase().replace(' ', "."));
        self.store
            .create_user(name, &email, "student")
            .expect("Failed to create user")
    }

    pub fn token_for(&self, user_id: UserId) -> String {
        jwt::issue_session_token(SECRET, user_id, "user@example.com", "student")
            .expect("Failed to issue token")
    }

    /// Connect as `user_id` and wait until the hub has registered the socket.
    pub async fn connect(&self, user_id: UserId) -> (WsWrite, WsRead) {
        let before = self.stats().await.connections;
        let url = format!("ws://{}/ws?token={}", self.addr, self.token_for(user_id));
        let (ws_stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("Failed to connect to WebSocket");
        self.wait_for_connections(before + 1).await;
        ws_stream.split()
    }

    pub async fn stats(&self) -> HubStats {
        self.hub.stats().await.expect("Hub dispatcher should be running")
    }

    /// Poll the dispatcher until it reports `expected` live connections.
    pub async fn wait_for_connections(&self, expected: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let stats = self.stats().await;
            if stats.connections == expected {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "Expected {} connections, hub reports {:?}",
                expected,
                stats
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// Send a chat frame.
pub async fn send_json(write: &mut WsWrite, value: serde_json::Value) {
    write
        .send(Message::Text(value.to_string().into()))
        .await
        .expect("Failed to send frame");
}

/// Next text frame within two seconds, skipping control frames.
pub async fn next_text(read: &mut WsRead) -> String {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let msg = tokio::time::timeout_at(deadline, read.next())
            .await
            .expect("Expected a text frame within timeout");
        match msg {
            Some(Ok(Message::Text(text))) => return text.as_str().to_string(),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("Expected text frame, got: {:?}", other),
        }
    }
}

/// Assert that no text frame arrives for a short while.
pub async fn expect_silence(read: &mut WsRead) {
    let result = tokio::time::timeout(Duration::from_millis(300), read.next()).await;
    match result {
        Err(_) => {}
        Ok(Some(Ok(msg))) if msg.is_ping() || msg.is_pong() => {}
        Ok(other) => panic!("Expected no frame, got: {:?}", other),
    }
}
