//! Lazily registered sessions and their in-memory ordered logs.
//!
//! The router exclusively owns these logs; the local store is a durable
//! mirror, not authoritative. Insertion keeps each log sorted ascending by
//! time, and the no-two-entries-share-an-id invariant is enforced by the
//! dedup checks on every insert path.

use std::collections::HashMap;

use palaver_shared::types::{Message, Session, SessionKind};
use tracing::debug;

/// One session's ordered message log.
#[derive(Debug)]
pub struct SessionLog {
    pub session: Session,
    messages: Vec<Message>,
    /// Guards the one-shot local cache load: a second load of an
    /// already-populated session is a no-op, not a reload.
    loaded: bool,
}

impl SessionLog {
    fn new(session: Session) -> Self {
        Self {
            session,
            messages: Vec::new(),
            loaded: false,
        }
    }

    /// Insert keeping ascending time order. Returns `false` without
    /// inserting when an entry already matches under the dedup rule.
    pub fn insert_sorted(&mut self, message: Message) -> bool {
        if self.contains_match(&message) {
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| m.time <= message.time);
        self.messages.insert(at, message);
        true
    }

    /// Whether any entry matches under the id / triple dedup rule.
    pub fn contains_match(&self, message: &Message) -> bool {
        self.messages.iter().any(|m| m.dedup_matches(message))
    }

    /// Remove an entry by id. Returns whether one was removed.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        self.messages.len() != before
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn mark_loaded(&mut self) {
        self.loaded = true;
    }
}

/// All sessions known to this window, created lazily on first reference and
/// never deleted client-side.
#[derive(Debug, Default)]
pub struct SessionBook {
    sessions: HashMap<String, SessionLog>,
}

impl SessionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session if it is not already known. The first reference
    /// wins; later registrations do not overwrite the kind.
    pub fn register(&mut self, session: Session) -> &mut SessionLog {
        self.sessions.entry(session.id.clone()).or_insert_with(|| {
            debug!(session = %session.id, kind = ?session.kind, "session registered");
            SessionLog::new(session)
        })
    }

    /// Register-by-reference: a bare session id from a message becomes a
    /// room session by default.
    pub fn ensure(&mut self, session_id: &str) -> &mut SessionLog {
        if !self.sessions.contains_key(session_id) {
            self.register(Session::room(session_id));
        }
        self.sessions
            .get_mut(session_id)
            .unwrap_or_else(|| unreachable!("registered above"))
    }

    /// Register-by-reference for private traffic: the session id is the
    /// peer's username and a fresh registration starts as a temporary
    /// private chat.
    pub fn ensure_private(&mut self, peer: &str) -> &mut SessionLog {
        if !self.sessions.contains_key(peer) {
            self.register(Session::private(peer, false));
        }
        self.sessions
            .get_mut(peer)
            .unwrap_or_else(|| unreachable!("registered above"))
    }

    /// Register (or upgrade) the private session of a friend-list entry.
    /// Friendship is the one attribute that may change after registration;
    /// a room that happens to share the friend's name is left alone.
    pub fn register_friend(&mut self, peer: &str) -> &mut SessionLog {
        let log = self.ensure_private(peer);
        if log.session.kind == SessionKind::PrivateTemp {
            log.session.kind = SessionKind::PrivateFriend;
        }
        if log.session.kind == SessionKind::PrivateFriend {
            log.session.is_friend = true;
        }
        log
    }

    pub fn get(&self, session_id: &str) -> Option<&SessionLog> {
        self.sessions.get(session_id)
    }

    pub fn get_mut(&mut self, session_id: &str) -> Option<&mut SessionLog> {
        self.sessions.get_mut(session_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use palaver_shared::types::MessageKind;

    fn msg(id: &str, secs: i64) -> Message {
        Message {
            id: id.to_string(),
            session_id: "room1".into(),
            from: "alice".into(),
            content: format!("m {id}"),
            time: DateTime::from_timestamp(1_760_000_000 + secs, 0).unwrap(),
            is_system: false,
            kind: MessageKind::Text,
            is_nsfw: false,
            opaque_iv: None,
            conversation_id: None,
        }
    }

    #[test]
    fn insert_keeps_time_order() {
        let mut log = SessionLog::new(Session::room("room1"));
        assert!(log.insert_sorted(msg("c", 3)));
        assert!(log.insert_sorted(msg("a", 1)));
        assert!(log.insert_sorted(msg("b", 2)));

        let ids: Vec<&str> = log.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(log.messages().windows(2).all(|w| w[0].time <= w[1].time));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let mut log = SessionLog::new(Session::room("room1"));
        assert!(log.insert_sorted(msg("a", 1)));
        assert!(!log.insert_sorted(msg("a", 1)));
        assert_eq!(log.messages().len(), 1);
    }

    #[test]
    fn ensure_registers_lazily_once() {
        let mut book = SessionBook::new();
        book.ensure("room1");
        book.ensure("room1");
        assert_eq!(book.len(), 1);

        // An explicit registration after the fact does not replace the log.
        book.get_mut("room1").unwrap().insert_sorted(msg("a", 1));
        book.register(Session::room("room1"));
        assert_eq!(book.get("room1").unwrap().messages().len(), 1);
    }

    #[test]
    fn friend_entry_upgrades_temporary_private_session() {
        let mut book = SessionBook::new();
        book.ensure_private("bob");
        assert_eq!(book.get("bob").unwrap().session.kind, SessionKind::PrivateTemp);

        let log = book.register_friend("bob");
        assert_eq!(log.session.kind, SessionKind::PrivateFriend);
        assert!(log.session.is_friend);

        // Friend entries for unknown peers register directly as friends.
        let log = book.register_friend("carol");
        assert_eq!(log.session.kind, SessionKind::PrivateFriend);
        assert!(log.session.is_friend);
    }

    #[test]
    fn friend_entry_leaves_room_of_same_name_alone() {
        let mut book = SessionBook::new();
        book.ensure("bob");
        let log = book.register_friend("bob");
        assert_eq!(log.session.kind, SessionKind::Room);
        assert!(!log.session.is_friend);
    }
}
