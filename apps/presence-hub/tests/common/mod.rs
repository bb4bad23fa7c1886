#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::{tungstenite, MaybeTlsStream, WebSocketStream};

use presence_hub::auth::tokens;
use presence_hub::config::Config;
use presence_hub::db::kv::{KeyValueStore, MemoryStore};
use presence_hub::gateway::hub::HubHandle;
use presence_hub::AppState;

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build a test AppState with in-memory KV and a running hub.
pub fn test_state() -> AppState {
    test_state_with(Config::default())
}

pub fn test_state_with(config: Config) -> AppState {
    test_state_with_kv(config, Arc::new(MemoryStore::new()))
}

pub fn test_state_with_kv(config: Config, kv: Arc<dyn KeyValueStore>) -> AppState {
    let hub = HubHandle::spawn(&config, None);
    AppState {
        kv,
        config: Arc::new(config),
        hub,
    }
}

/// Build the full application router wired to a fresh test state.
pub fn test_app() -> (Router, AppState) {
    let state = test_state();
    (test_app_with(&state), state)
}

pub fn test_app_with(state: &AppState) -> Router {
    presence_hub::routes::router(&state.config).with_state(state.clone())
}

/// Start an actual TCP server for WebSocket testing. The server runs in the
/// background.
pub async fn start_ws_server() -> (SocketAddr, AppState) {
    start_ws_server_with(test_state()).await
}

pub async fn start_ws_server_with(state: AppState) -> (SocketAddr, AppState) {
    let app = presence_hub::routes::router(&state.config).with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state)
}

pub async fn access_token(state: &AppState, user_id: &str, username: &str) -> String {
    tokens::issue_access_token(state.kv.as_ref(), user_id, username)
        .await
        .expect("issue access token")
}

pub async fn refresh_token(state: &AppState, user_id: &str, username: &str) -> String {
    tokens::issue_refresh_token(state.kv.as_ref(), user_id, username)
        .await
        .expect("issue refresh token")
}

/// Connect to the gateway with a token in the query string.
pub async fn connect(addr: SocketAddr, token: &str) -> WsClient {
    let url = format!("ws://{addr}/gateway?token={token}");
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");
    ws
}

/// Read JSON text frames until one satisfies `pred`, skipping the rest.
pub async fn recv_until(
    ws: &mut WsClient,
    pred: impl Fn(&serde_json::Value) -> bool,
) -> serde_json::Value {
    loop {
        let msg = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream ended")
            .expect("ws read error");

        if let tungstenite::Message::Text(text) = msg {
            let value: serde_json::Value = serde_json::from_str(&text).expect("parse frame");
            if pred(&value) {
                return value;
            }
        }
    }
}

/// Read the next JSON text frame, skipping control frames.
pub async fn recv_json(ws: &mut WsClient) -> serde_json::Value {
    recv_until(ws, |_| true).await
}

/// Wait for a close frame or the end of the stream, ignoring data frames.
/// Returns the close code if one was sent.
pub async fn recv_close(ws: &mut WsClient) -> Option<u16> {
    loop {
        let next = time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timeout waiting for close");
        match next {
            Some(Ok(tungstenite::Message::Close(frame))) => {
                return frame.map(|f| u16::from(f.code));
            }
            Some(Ok(_)) => continue,
            Some(Err(_)) | None => return None,
        }
    }
}

/// Wait until the hub's registry satisfies `pred`.
pub async fn wait_for(state: &AppState, pred: impl Fn(&HubHandle) -> bool) {
    for _ in 0..100 {
        if pred(&state.hub) {
            return;
        }
        time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}
