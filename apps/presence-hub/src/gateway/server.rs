//! WebSocket upgrade handler and the per-connection reader and writer tasks.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::future::BoxFuture;
use futures_util::stream::SplitSink;
use futures_util::{FutureExt, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tower_http::timeout::TimeoutLayer;

use crate::auth::middleware::{AuthUser, GatewayUser};
use crate::AppState;

use super::events::{HubMessage, MessageStatus, MessageType};
use super::hub::HubHandle;
use super::session::{QueueError, Session};

/// Close code sent when the hub closes a session's queue.
const CLOSE_SESSION_ENDED: u16 = 4000;

/// History size returned when a request names no limit.
const DEFAULT_HISTORY_LIMIT: i64 = 50;

/// How long to wait for the writer to flush after unregistering.
const WRITER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub fn router(handshake_timeout: Duration) -> Router<AppState> {
    Router::new()
        .route("/gateway", get(ws_upgrade))
        .layer(TimeoutLayer::new(handshake_timeout))
}

/// Credentials are checked before the upgrade; a rejected request never
/// becomes a session.
async fn ws_upgrade(
    GatewayUser(user): GatewayUser,
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_failed_upgrade(|err| tracing::debug!(%err, "websocket upgrade failed"))
        .on_upgrade(move |socket| handle_connection(socket, state, user))
}

async fn handle_connection(socket: WebSocket, state: AppState, user: AuthUser) {
    let (ws_tx, ws_rx) = socket.split();
    let hub = state.hub.clone();

    let (session, outbound) = hub.new_session(user.user_id, user.username);
    hub.stats().record_connect();

    tracing::info!(
        session_id = session.id,
        user_id = %session.user_id,
        "gateway session established"
    );

    // Writer first, so the join broadcast has somewhere to go.
    let writer = tokio::spawn(run_writer(
        session.clone(),
        ws_tx,
        outbound,
        hub.clone(),
        state.config.heartbeat_interval,
    ));
    hub.register(session.clone()).await;

    drive_session(
        &session,
        ws_rx,
        &hub,
        state.config.idle_timeout,
        writer,
        dispatch_frame,
    )
    .await;

    hub.stats().record_disconnect();
    tracing::info!(
        session_id = session.id,
        user_id = %session.user_id,
        "gateway session ended"
    );
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum FrameError {
    Decode(serde_json::Error),
    Queue(QueueError),
}

/// Acts on one text frame from the client.
type FrameHandler =
    for<'a> fn(&'a Session, &'a HubHandle, &'a str) -> BoxFuture<'a, Result<(), FrameError>>;

fn dispatch_frame<'a>(
    session: &'a Session,
    hub: &'a HubHandle,
    text: &'a str,
) -> BoxFuture<'a, Result<(), FrameError>> {
    handle_frame(session, hub, text).boxed()
}

/// Run the reader to completion, then unregister and give the writer a
/// bounded window to flush its close frame.
async fn drive_session<S>(
    session: &Arc<Session>,
    ws_rx: S,
    hub: &HubHandle,
    idle_timeout: Duration,
    mut writer: JoinHandle<()>,
    handler: FrameHandler,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let writer_done = run_reader(session, ws_rx, hub, idle_timeout, &mut writer, handler).await;

    // Reached from every exit path; stale if the session was superseded.
    hub.unregister(session.clone()).await;

    if !writer_done && time::timeout(WRITER_SHUTDOWN_TIMEOUT, &mut writer).await.is_err() {
        tracing::debug!(session_id = session.id, "writer did not finish; aborting");
        writer.abort();
    }
}

/// Read client frames until the peer goes away, the connection idles out, a
/// frame is rejected, or the writer exits. Returns whether the writer has
/// already finished.
async fn run_reader<S>(
    session: &Arc<Session>,
    mut ws_rx: S,
    hub: &HubHandle,
    idle_timeout: Duration,
    writer: &mut JoinHandle<()>,
    handler: FrameHandler,
) -> bool
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = &mut *writer => return true,
            next = time::timeout(idle_timeout, ws_rx.next()) => next,
        };

        let frame = match next {
            Err(_elapsed) => {
                tracing::debug!(session_id = session.id, "idle timeout; closing connection");
                return false;
            }
            Ok(None) => return false,
            Ok(Some(Err(e))) => {
                tracing::debug!(?e, session_id = session.id, "ws read error");
                return false;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        session.touch();

        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => return false,
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Binary(_) => {
                tracing::debug!(session_id = session.id, "binary frame rejected");
                hub.stats().record_error();
                return false;
            }
        };

        let handled = AssertUnwindSafe(handler(session.as_ref(), hub, text.as_str()))
            .catch_unwind()
            .await;

        match handled {
            Ok(Ok(())) => {}
            Ok(Err(FrameError::Decode(err))) => {
                tracing::debug!(%err, session_id = session.id, "invalid frame; closing connection");
                hub.stats().record_error();
                return false;
            }
            Ok(Err(FrameError::Queue(err))) => {
                tracing::debug!(?err, session_id = session.id, "own queue unavailable");
                return false;
            }
            Err(_panic) => {
                tracing::error!(session_id = session.id, "panic while handling frame");
                hub.stats().record_error();
                return false;
            }
        }
    }
}

/// Act on one decoded client frame. Sender fields always come from the
/// session, never from the frame.
async fn handle_frame(session: &Session, hub: &HubHandle, text: &str) -> Result<(), FrameError> {
    let msg = HubMessage::decode(text).map_err(FrameError::Decode)?;

    match msg.kind {
        MessageType::Chat => {
            let chat = HubMessage::chat(&session.user_id, &session.username, msg.content);
            hub.broadcast(chat).await;
        }
        MessageType::Typing => {
            let typing = HubMessage {
                content: msg.content,
                created_at: Some(chrono::Utc::now()),
                ..HubMessage::new(MessageType::Typing)
            }
            .with_sender(&session.user_id, &session.username);
            hub.broadcast(typing).await;
        }
        MessageType::Receipt => match msg.status {
            Some(status) if msg.message_id != 0 && status.is_receipt_status() => {
                let receipt =
                    HubMessage::receipt(msg.message_id, status, &session.user_id, &session.username);
                hub.broadcast(receipt).await;
            }
            _ => reply(
                session,
                HubMessage::error("receipt requires message_id and a delivered or read status"),
            )?,
        },
        MessageType::HistoryRequest => {
            let limit = msg.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
            reply(session, HubMessage::history_response(hub.history(limit)))?;
        }
        MessageType::PresenceList => {
            reply(session, HubMessage::presence_list(hub.online_users()))?;
        }
        MessageType::Ping => reply(session, HubMessage::pong())?,
        other => {
            tracing::debug!(?other, session_id = session.id, "ignoring client frame");
        }
    }
    Ok(())
}

/// Queue a direct response on the session's own outbound queue.
fn reply(session: &Session, msg: HubMessage) -> Result<(), FrameError> {
    session.enqueue(Arc::new(msg)).map_err(FrameError::Queue)
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Drain the outbound queue onto the socket and keep the connection alive
/// with pings. Exits when the queue is closed or a write fails.
async fn run_writer(
    session: Arc<Session>,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Arc<HubMessage>>,
    hub: HubHandle,
    heartbeat_interval: Duration,
) {
    let mut heartbeat = time::interval(heartbeat_interval);
    heartbeat.tick().await; // First tick fires immediately; skip it.

    loop {
        tokio::select! {
            next = outbound.recv() => {
                let Some(msg) = next else {
                    let _ = send_close(&mut ws_tx, CLOSE_SESSION_ENDED, "Session closed").await;
                    break;
                };

                let json = match serde_json::to_string(msg.as_ref()) {
                    Ok(json) => json,
                    Err(err) => {
                        tracing::error!(%err, session_id = session.id, "failed to encode message");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }

                // Implicit delivery acknowledgement for other users' chats.
                if msg.kind == MessageType::Chat && msg.user_id != session.user_id {
                    let receipt = HubMessage::receipt(
                        msg.message_id,
                        MessageStatus::Delivered,
                        &session.user_id,
                        &session.username,
                    );
                    hub.broadcast(receipt).await;
                }
            }

            _ = heartbeat.tick() => {
                if ws_tx.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!(session_id = session.id, "writer exited");
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    code: u16,
    reason: &str,
) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}
