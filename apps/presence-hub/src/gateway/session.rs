//! Per-connection session state and its bounded outbound queue.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::events::HubMessage;

/// Why an outbound enqueue was refused. Both cases mean the session is gone
/// as far as the hub is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    Full,
    Closed,
}

/// State for a single WebSocket connection.
pub struct Session {
    /// Process-unique session identifier.
    pub id: u64,
    /// Authenticated user ID; the registry key.
    pub user_id: String,
    /// Display name cached at connect time.
    pub username: String,
    pub joined_at: DateTime<Utc>,
    last_active_ms: AtomicI64,
    /// The only sender for the writer's queue. Taking it closes the queue.
    outbound: Mutex<Option<mpsc::Sender<Arc<HubMessage>>>>,
}

impl Session {
    /// Create a session and the receiving half of its outbound queue, which
    /// belongs to the writer task.
    pub fn new(
        id: u64,
        user_id: String,
        username: String,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Arc<HubMessage>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let now = Utc::now();
        let session = Self {
            id,
            user_id,
            username,
            joined_at: now,
            last_active_ms: AtomicI64::new(now.timestamp_millis()),
            outbound: Mutex::new(Some(tx)),
        };
        (session, rx)
    }

    /// Non-blocking enqueue onto the outbound queue.
    pub fn enqueue(&self, msg: Arc<HubMessage>) -> Result<(), QueueError> {
        let guard = self.outbound.lock();
        let tx = guard.as_ref().ok_or(QueueError::Closed)?;
        tx.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => QueueError::Full,
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Close the outbound queue. The writer drains what is already queued and
    /// then exits. Returns `false` if the queue was already closed.
    pub fn close(&self) -> bool {
        self.outbound.lock().take().is_some()
    }

    pub fn is_closed(&self) -> bool {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.is_closed(),
            None => true,
        }
    }

    /// Record inbound activity.
    pub fn touch(&self) {
        self.last_active_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_active_at(&self) -> DateTime<Utc> {
        let ms = self.last_active_ms.load(Ordering::Relaxed);
        DateTime::from_timestamp_millis(ms).unwrap_or(self.joined_at)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("username", &self.username)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::events::MessageType;

    fn ping() -> Arc<HubMessage> {
        Arc::new(HubMessage::new(MessageType::Ping))
    }

    #[test]
    fn enqueue_reports_full_queue() {
        let (session, _rx) = Session::new(1, "u1".into(), "alice".into(), 2);
        assert!(session.enqueue(ping()).is_ok());
        assert!(session.enqueue(ping()).is_ok());
        assert_eq!(session.enqueue(ping()), Err(QueueError::Full));
    }

    #[test]
    fn enqueue_after_close_is_refused() {
        let (session, _rx) = Session::new(1, "u1".into(), "alice".into(), 4);
        assert!(session.close());
        assert!(!session.close());
        assert!(session.is_closed());
        assert_eq!(session.enqueue(ping()), Err(QueueError::Closed));
    }

    #[test]
    fn dropped_receiver_counts_as_closed() {
        let (session, rx) = Session::new(1, "u1".into(), "alice".into(), 4);
        drop(rx);
        assert!(session.is_closed());
        assert_eq!(session.enqueue(ping()), Err(QueueError::Closed));
    }

    #[tokio::test]
    async fn close_lets_writer_drain_then_finish() {
        let (session, mut rx) = Session::new(1, "u1".into(), "alice".into(), 4);
        session.enqueue(ping()).unwrap();
        session.close();

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn touch_moves_last_active_forward() {
        let (session, _rx) = Session::new(1, "u1".into(), "alice".into(), 1);
        let before = session.last_active_at();
        std::thread::sleep(std::time::Duration::from_millis(5));
        session.touch();
        assert!(session.last_active_at() > before);
        assert!(session.last_active_at() >= session.joined_at);
    }
}
