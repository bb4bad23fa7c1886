//! Bounded in-memory history of recent chat messages.
//!
//! Written only by the hub task; history requests and admin queries read
//! through the same short-lived lock.

use std::collections::VecDeque;

use parking_lot::Mutex;

use super::events::{HubMessage, MessageStatus};

/// Result of applying a receipt to a stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    /// The status moved forward. Carries the original sender so the receipt
    /// can be routed back to them.
    Advanced { sender_id: String },
    /// Duplicate or out-of-order receipt; nothing changed.
    Unchanged,
    /// The reporter wrote the message. Senders do not acknowledge themselves.
    OwnMessage,
    /// No message with that ID is retained.
    NotFound,
}

pub struct HistoryStore {
    messages: Mutex<VecDeque<HubMessage>>,
    capacity: usize,
    limit_cap: usize,
}

impl HistoryStore {
    pub fn new(capacity: usize, limit_cap: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            limit_cap: limit_cap.max(1),
        }
    }

    /// Append a chat message, evicting the oldest entries beyond capacity.
    pub fn append(&self, msg: HubMessage) {
        let mut messages = self.messages.lock();
        messages.push_back(msg);
        while messages.len() > self.capacity {
            messages.pop_front();
        }
    }

    /// The most recent `min(limit, cap, len)` messages, oldest first.
    /// A non-positive limit yields nothing.
    pub fn recent(&self, limit: i64) -> Vec<HubMessage> {
        if limit <= 0 {
            return Vec::new();
        }
        let limit = usize::try_from(limit)
            .unwrap_or(usize::MAX)
            .min(self.limit_cap);

        let messages = self.messages.lock();
        let skip = messages.len().saturating_sub(limit);
        messages.iter().skip(skip).cloned().collect()
    }

    pub fn get(&self, message_id: i64) -> Option<HubMessage> {
        let messages = self.messages.lock();
        messages
            .iter()
            .rev()
            .find(|m| m.message_id == message_id)
            .cloned()
    }

    /// Apply a receipt status reported by `reporter_id` to a stored message
    /// if it is a forward move.
    pub fn update_status(
        &self,
        message_id: i64,
        reporter_id: &str,
        status: MessageStatus,
    ) -> StatusUpdate {
        let mut messages = self.messages.lock();
        let Some(msg) = messages.iter_mut().rev().find(|m| m.message_id == message_id) else {
            return StatusUpdate::NotFound;
        };
        if msg.user_id == reporter_id {
            return StatusUpdate::OwnMessage;
        }

        let current = msg.status.unwrap_or(MessageStatus::Sent);
        if !current.can_advance_to(status) {
            return StatusUpdate::Unchanged;
        }
        msg.status = Some(status);
        StatusUpdate::Advanced {
            sender_id: msg.user_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(id: i64) -> HubMessage {
        let mut msg = HubMessage::chat("u1", "alice", format!("message {id}"));
        msg.message_id = id;
        msg.status = Some(MessageStatus::Sent);
        msg
    }

    #[test]
    fn evicts_oldest_when_over_capacity() {
        let store = HistoryStore::new(1000, 1000);
        for id in 1..=1050 {
            store.append(chat(id));
        }

        let all = store.recent(1050);
        assert_eq!(all.len(), 1000);
        // First 50 evicted, remaining in chronological order.
        assert_eq!(all.first().unwrap().message_id, 51);
        assert_eq!(all.last().unwrap().message_id, 1050);
        assert!(all.windows(2).all(|w| w[0].message_id < w[1].message_id));
        assert!(store.get(50).is_none());
        assert!(store.get(51).is_some());
    }

    #[test]
    fn recent_clamps_to_stored_count() {
        let store = HistoryStore::new(1000, 200);
        for id in 1..=80 {
            store.append(chat(id));
        }
        let msgs = store.recent(150);
        assert_eq!(msgs.len(), 80);
        assert_eq!(msgs[0].message_id, 1);
    }

    #[test]
    fn recent_clamps_to_hard_cap() {
        let store = HistoryStore::new(1000, 100);
        for id in 1..=300 {
            store.append(chat(id));
        }
        let msgs = store.recent(i64::MAX);
        assert_eq!(msgs.len(), 100);
        assert_eq!(msgs[0].message_id, 201);
        assert_eq!(msgs[99].message_id, 300);
    }

    #[test]
    fn non_positive_limit_is_empty() {
        let store = HistoryStore::new(10, 10);
        store.append(chat(1));
        assert!(store.recent(0).is_empty());
        assert!(store.recent(-5).is_empty());
    }

    #[test]
    fn later_status_wins() {
        let store = HistoryStore::new(10, 10);
        store.append(chat(1));

        assert_eq!(
            store.update_status(1, "u2", MessageStatus::Read),
            StatusUpdate::Advanced {
                sender_id: "u1".into()
            }
        );
        // A delivered receipt arriving after read does not move it back.
        assert_eq!(
            store.update_status(1, "u2", MessageStatus::Delivered),
            StatusUpdate::Unchanged
        );
        assert_eq!(store.get(1).unwrap().status, Some(MessageStatus::Read));
    }

    #[test]
    fn duplicate_receipt_is_idempotent() {
        let store = HistoryStore::new(10, 10);
        store.append(chat(1));
        assert!(matches!(
            store.update_status(1, "u2", MessageStatus::Delivered),
            StatusUpdate::Advanced { .. }
        ));
        assert_eq!(
            store.update_status(1, "u2", MessageStatus::Delivered),
            StatusUpdate::Unchanged
        );
    }

    #[test]
    fn error_only_from_sent() {
        let store = HistoryStore::new(10, 10);
        store.append(chat(1));
        store.append(chat(2));
        store.update_status(2, "u2", MessageStatus::Delivered);

        assert!(matches!(
            store.update_status(1, "u2", MessageStatus::Error),
            StatusUpdate::Advanced { .. }
        ));
        assert_eq!(
            store.update_status(2, "u2", MessageStatus::Error),
            StatusUpdate::Unchanged
        );
    }

    #[test]
    fn sender_cannot_acknowledge_own_message() {
        let store = HistoryStore::new(10, 10);
        store.append(chat(1));

        assert_eq!(
            store.update_status(1, "u1", MessageStatus::Read),
            StatusUpdate::OwnMessage
        );
        assert_eq!(store.get(1).unwrap().status, Some(MessageStatus::Sent));
    }

    #[test]
    fn unknown_message_is_not_found() {
        let store = HistoryStore::new(10, 10);
        assert_eq!(
            store.update_status(42, "u2", MessageStatus::Read),
            StatusUpdate::NotFound
        );
        assert!(store.get(42).is_none());
    }
}
