//! Identity → session map.
//!
//! Mutated only by the hub task (`pub(crate)` mutators). Lookups and
//! presence snapshots take the read lock for the duration of the map access.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::events::OnlineUser;
use super::session::Session;

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Insert `session` under its identity, returning the session it replaced.
    pub(crate) fn insert(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        self.sessions
            .write()
            .insert(session.user_id.clone(), session)
    }

    /// Remove the entry for `session`'s identity, but only if it is still
    /// this exact session. Returns whether anything was removed.
    pub(crate) fn remove_if_current(&self, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(&session.user_id) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(&session.user_id);
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, user_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(user_id).cloned()
    }

    /// Every registered session, for fan-out.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Presence list, sorted by user ID. One entry per identity.
    pub fn online_users(&self) -> Vec<OnlineUser> {
        let mut users: Vec<OnlineUser> = self
            .sessions
            .read()
            .values()
            .map(|s| OnlineUser {
                user_id: s.user_id.clone(),
                username: s.username.clone(),
                online: true,
            })
            .collect();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: u64, user_id: &str) -> Arc<Session> {
        let (session, _rx) = Session::new(id, user_id.to_string(), format!("name{id}"), 8);
        Arc::new(session)
    }

    #[test]
    fn insert_replaces_same_identity() {
        let registry = SessionRegistry::new();
        let first = session(1, "u1");
        let second = session(2, "u1");

        assert!(registry.insert(first.clone()).is_none());
        let replaced = registry.insert(second.clone()).unwrap();
        assert!(Arc::ptr_eq(&replaced, &first));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("u1").unwrap().id, 2);
    }

    #[test]
    fn stale_remove_is_ignored() {
        let registry = SessionRegistry::new();
        let first = session(1, "u1");
        let second = session(2, "u1");
        registry.insert(first.clone());
        registry.insert(second.clone());

        assert!(!registry.remove_if_current(&first));
        assert!(Arc::ptr_eq(&registry.get("u1").unwrap(), &second));

        assert!(registry.remove_if_current(&second));
        assert!(registry.is_empty());
    }

    #[test]
    fn online_users_has_one_entry_per_identity() {
        let registry = SessionRegistry::new();
        registry.insert(session(1, "u2"));
        registry.insert(session(2, "u1"));
        registry.insert(session(3, "u2"));

        let users = registry.online_users();
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].user_id, "u1");
        assert_eq!(users[1].user_id, "u2");
        assert_eq!(users[1].username, "name3");
        assert!(users.iter().all(|u| u.online));
    }

    #[test]
    fn get_unknown_is_none() {
        let registry = SessionRegistry::new();
        assert!(registry.get("nobody").is_none());
    }
}
