//! Session-name ↔ server conversation-id map.
//!
//! Conversation ids disambiguate sessions that share a display name. The
//! cache is populated opportunistically from any server payload carrying
//! both names, only ever overwritten, never invalidated. A message tagged
//! with a conversation id the registry cannot resolve is *dropped* by the
//! router rather than guessed into a same-named session.

use std::collections::HashMap;

use tracing::debug;

/// Conversation-id cache.
#[derive(Debug, Default)]
pub struct ConversationRegistry {
    by_session: HashMap<String, String>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or overwrite) the conversation id of a session.
    pub fn remember(&mut self, session_id: impl Into<String>, conversation_id: impl Into<String>) {
        let session_id = session_id.into();
        let conversation_id = conversation_id.into();
        debug!(session = %session_id, conversation = %conversation_id, "conversation mapping");
        self.by_session.insert(session_id, conversation_id);
    }

    /// The known conversation id of a session, if any.
    pub fn conversation_for(&self, session_id: &str) -> Option<&str> {
        self.by_session.get(session_id).map(String::as_str)
    }

    /// Reverse lookup, needed when a message arrives tagged only with a
    /// conversation id. A linear scan: the map is small (one entry per
    /// session of one login).
    pub fn session_for(&self, conversation_id: &str) -> Option<&str> {
        self.by_session
            .iter()
            .find(|(_, conv)| conv.as_str() == conversation_id)
            .map(|(session, _)| session.as_str())
    }
}
