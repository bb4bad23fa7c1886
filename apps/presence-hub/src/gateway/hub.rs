//! The coordinating task.
//!
//! A single task owns every registry mutation and every fan-out. Connection
//! tasks talk to it through [`HubHandle`], which also serves read-only
//! queries straight from the registry and history under their own locks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use presence_common::SnowflakeGenerator;
use tokio::sync::mpsc;

use crate::config::Config;

use super::events::{HubMessage, MessageStatus, MessageType, OnlineUser};
use super::history::{HistoryStore, StatusUpdate};
use super::registry::SessionRegistry;
use super::session::{QueueError, Session};
use super::stats::{ConnectionStats, StatsSnapshot};
use super::transcript::{TranscriptSink, TranscriptWriter};

/// Events processed one at a time by the hub task.
#[derive(Debug)]
pub enum HubEvent {
    Register(Arc<Session>),
    Unregister(Arc<Session>),
    Broadcast(HubMessage),
}

/// Something to fan out. Presence lists are built when they are sent so they
/// reflect evictions that happened earlier in the same pass.
enum Outgoing {
    Message(HubMessage),
    PresenceList,
}

/// Cloneable handle to the hub. Store in `AppState`.
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
    registry: Arc<SessionRegistry>,
    history: Arc<HistoryStore>,
    stats: Arc<ConnectionStats>,
    session_ids: Arc<AtomicU64>,
    queue_capacity: usize,
}

impl HubHandle {
    /// Build a hub and spawn its task on the current runtime.
    pub fn spawn(config: &Config, transcript: Option<Arc<dyn TranscriptSink>>) -> Self {
        let (hub, handle) = Hub::new(config, transcript);
        tokio::spawn(hub.run());
        handle
    }

    /// Allocate a session for a freshly upgraded connection. The receiver is
    /// the writer task's end of the outbound queue.
    pub fn new_session(
        &self,
        user_id: String,
        username: String,
    ) -> (Arc<Session>, mpsc::Receiver<Arc<HubMessage>>) {
        let id = self.session_ids.fetch_add(1, Ordering::Relaxed) + 1;
        let (session, rx) = Session::new(id, user_id, username, self.queue_capacity);
        (Arc::new(session), rx)
    }

    pub async fn register(&self, session: Arc<Session>) {
        self.send(HubEvent::Register(session)).await;
    }

    pub async fn unregister(&self, session: Arc<Session>) {
        self.send(HubEvent::Unregister(session)).await;
    }

    pub async fn broadcast(&self, msg: HubMessage) {
        self.send(HubEvent::Broadcast(msg)).await;
    }

    async fn send(&self, event: HubEvent) {
        if self.events.send(event).await.is_err() {
            tracing::warn!("hub task has stopped; event dropped");
        }
    }

    /// The session currently registered for `user_id`.
    pub fn get_client(&self, user_id: &str) -> Option<Arc<Session>> {
        self.registry.get(user_id)
    }

    /// Every live session, for operational views.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.registry.snapshot()
    }

    pub fn online_users(&self) -> Vec<OnlineUser> {
        self.registry.online_users()
    }

    pub fn history(&self, limit: i64) -> Vec<HubMessage> {
        self.history.recent(limit)
    }

    pub fn message_by_id(&self, message_id: i64) -> Option<HubMessage> {
        self.history.get(message_id)
    }

    pub fn active_connections(&self) -> usize {
        self.registry.len()
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot(self.registry.len())
    }
}

/// The hub task's state. Only `run` and the tests touch it.
pub struct Hub {
    events: mpsc::Receiver<HubEvent>,
    registry: Arc<SessionRegistry>,
    history: Arc<HistoryStore>,
    stats: Arc<ConnectionStats>,
    ids: SnowflakeGenerator,
    transcript: Option<TranscriptWriter>,
}

impl Hub {
    /// Build a hub and its handle. With a transcript sink, a writer task is
    /// spawned on the current runtime.
    pub fn new(
        config: &Config,
        transcript: Option<Arc<dyn TranscriptSink>>,
    ) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.hub_event_capacity.max(1));
        let registry = Arc::new(SessionRegistry::new());
        let history = Arc::new(HistoryStore::new(
            config.history_capacity,
            config.history_limit_cap,
        ));
        let stats = Arc::new(ConnectionStats::new());

        let hub = Self {
            events: rx,
            registry: registry.clone(),
            history: history.clone(),
            stats: stats.clone(),
            ids: SnowflakeGenerator::new(config.worker_id),
            transcript: transcript
                .map(|sink| TranscriptWriter::spawn(sink, config.transcript_queue_capacity)),
        };
        let handle = HubHandle {
            events: tx,
            registry,
            history,
            stats,
            session_ids: Arc::new(AtomicU64::new(0)),
            queue_capacity: config.outbound_queue_capacity,
        };
        (hub, handle)
    }

    /// Process events until every handle has been dropped.
    pub async fn run(mut self) {
        tracing::info!("hub started");
        while let Some(event) = self.events.recv().await {
            self.handle(event);
        }
        tracing::info!("hub stopped");
    }

    pub fn handle(&self, event: HubEvent) {
        match event {
            HubEvent::Register(session) => self.register(session),
            HubEvent::Unregister(session) => self.unregister(session),
            HubEvent::Broadcast(msg) => self.broadcast(msg),
        }
    }

    fn register(&self, session: Arc<Session>) {
        if let Some(previous) = self.registry.insert(session.clone()) {
            if !Arc::ptr_eq(&previous, &session) {
                previous.close();
                tracing::info!(
                    user_id = %session.user_id,
                    old_session = previous.id,
                    new_session = session.id,
                    "session superseded"
                );
            }
        }

        self.fan_out([
            Outgoing::Message(HubMessage::join(&session.user_id, &session.username)),
            Outgoing::PresenceList,
        ]);
    }

    fn unregister(&self, session: Arc<Session>) {
        let removed = self.registry.remove_if_current(&session);
        session.close();

        if !removed {
            tracing::debug!(
                session_id = session.id,
                user_id = %session.user_id,
                "stale unregister ignored"
            );
            return;
        }

        self.fan_out([
            Outgoing::Message(HubMessage::leave(&session.user_id, &session.username)),
            Outgoing::PresenceList,
        ]);
    }

    fn broadcast(&self, mut msg: HubMessage) {
        match msg.kind {
            MessageType::Chat => {
                if msg.message_id == 0 {
                    msg.message_id = self.ids.generate();
                }
                if msg.created_at.is_none() {
                    msg.created_at = Some(Utc::now());
                }
                msg.status = Some(MessageStatus::Sent);

                self.history.append(msg.clone());
                if let Some(transcript) = &self.transcript {
                    transcript.submit(msg.clone());
                }
                self.fan_out([Outgoing::Message(msg)]);
            }
            MessageType::Receipt => self.route_receipt(msg),
            _ => self.fan_out([Outgoing::Message(msg)]),
        }
    }

    /// Apply a receipt to history and, if the status moved forward, tell the
    /// original sender. Unknown or stale references are dropped quietly.
    fn route_receipt(&self, mut msg: HubMessage) {
        let Some(status) = msg.status.filter(|s| s.is_receipt_status()) else {
            tracing::debug!(message_id = msg.message_id, "receipt without usable status");
            return;
        };
        if msg.message_id == 0 {
            return;
        }

        let sender_id = match self.history.update_status(msg.message_id, &msg.user_id, status) {
            StatusUpdate::Advanced { sender_id } => sender_id,
            StatusUpdate::Unchanged => return,
            StatusUpdate::OwnMessage => {
                tracing::debug!(message_id = msg.message_id, "sender acknowledged own message");
                return;
            }
            StatusUpdate::NotFound => {
                tracing::debug!(message_id = msg.message_id, "receipt for unknown message");
                return;
            }
        };

        let Some(sender) = self.registry.get(&sender_id) else {
            return;
        };
        if msg.created_at.is_none() {
            msg.created_at = Some(Utc::now());
        }
        if let Err(err) = sender.enqueue(Arc::new(msg)) {
            if self.evict(&sender, err) {
                self.fan_out([
                    Outgoing::Message(HubMessage::leave(&sender.user_id, &sender.username)),
                    Outgoing::PresenceList,
                ]);
            }
        }
    }

    /// Non-blocking enqueue onto every registered session. Sessions whose
    /// queue is full or closed are removed, and their departure is announced
    /// in the same pass.
    fn fan_out(&self, items: impl IntoIterator<Item = Outgoing>) {
        let mut pending: VecDeque<Outgoing> = items.into_iter().collect();

        while let Some(item) = pending.pop_front() {
            let msg = Arc::new(match item {
                Outgoing::Message(msg) => msg,
                Outgoing::PresenceList => HubMessage::presence_list(self.registry.online_users()),
            });

            for session in self.registry.snapshot() {
                if let Err(err) = session.enqueue(msg.clone()) {
                    if self.evict(&session, err) {
                        pending.push_back(Outgoing::Message(HubMessage::leave(
                            &session.user_id,
                            &session.username,
                        )));
                        pending.push_back(Outgoing::PresenceList);
                    }
                }
            }
        }
    }

    /// Remove a session that could not accept a message. Returns `true` if it
    /// was still registered.
    fn evict(&self, session: &Arc<Session>, err: QueueError) -> bool {
        if !self.registry.remove_if_current(session) {
            session.close();
            return false;
        }
        session.close();

        match err {
            QueueError::Full => {
                self.stats.record_error();
                tracing::warn!(
                    session_id = session.id,
                    user_id = %session.user_id,
                    "outbound queue full; disconnecting session"
                );
            }
            QueueError::Closed => {
                tracing::debug!(
                    session_id = session.id,
                    user_id = %session.user_id,
                    "outbound queue closed; removing session"
                );
            }
        }
        true
    }
}
