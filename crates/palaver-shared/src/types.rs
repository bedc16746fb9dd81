use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Discriminant of a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    File,
    Private,
    System,
}

impl MessageKind {
    /// Short tag used as the leading component of generated message ids.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Text => "txt",
            Self::Image => "img",
            Self::File => "file",
            Self::Private => "priv",
            Self::System => "sys",
        }
    }
}

/// A single chat message as the engine sees it.
///
/// `id` is the primary dedup key; messages from legacy or partial payloads
/// may arrive without one, in which case the content+from+time triple is the
/// fallback identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    /// Globally unique id: `{kind}-{session}-{unix_millis}-{random suffix}`.
    /// Empty for legacy payloads that never carried one.
    pub id: String,
    /// Owning session (room name or peer username).
    pub session_id: String,
    /// Sender username.
    pub from: String,
    /// Message body. Ciphertext (base64) when `opaque_iv` is set; the engine
    /// never inspects which.
    pub content: String,
    /// Origin timestamp as reported by the sender.
    pub time: DateTime<Utc>,
    /// Whether this is a server-generated system notice.
    pub is_system: bool,
    /// Message discriminant.
    pub kind: MessageKind,
    /// NSFW flag carried through to the store's secondary index.
    pub is_nsfw: bool,
    /// Detached cipher nonce (base64) for encrypted payloads.
    pub opaque_iv: Option<String>,
    /// Server-issued conversation id, when the server tagged one.
    pub conversation_id: Option<String>,
}

impl Message {
    /// Build a freshly authored message with a generated globally unique id.
    pub fn compose(
        kind: MessageKind,
        session_id: impl Into<String>,
        from: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let session_id = session_id.into();
        let time = Utc::now();

        let mut suffix = [0u8; 4];
        rand::rngs::OsRng.fill_bytes(&mut suffix);
        let id = format!(
            "{}-{}-{}-{}",
            kind.tag(),
            session_id,
            time.timestamp_millis(),
            hex::encode(suffix)
        );

        Self {
            id,
            session_id,
            from: from.into(),
            content: content.into(),
            time,
            is_system: false,
            kind,
            is_nsfw: false,
            opaque_iv: None,
            conversation_id: None,
        }
    }

    /// Whether this message carries a usable primary dedup key.
    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    /// Identity check used by every merge path: id equality when both sides
    /// have one, otherwise the content+from+time triple.
    pub fn dedup_matches(&self, other: &Message) -> bool {
        if self.has_id() && other.has_id() {
            return self.id == other.id;
        }
        self.content == other.content && self.from == other.from && self.time == other.time
    }
}

/// What kind of conversation target a session is.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Room,
    PrivateTemp,
    PrivateFriend,
}

/// A named conversation target. Sessions are registered lazily the first
/// time a message or action references them and never deleted client-side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    /// Stable for the lifetime of a login: the room name for rooms, the
    /// peer's username for private chats.
    pub id: String,
    /// Display name.
    pub name: String,
    pub kind: SessionKind,
    pub is_friend: bool,
}

impl Session {
    pub fn room(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            kind: SessionKind::Room,
            is_friend: false,
        }
    }

    pub fn private(peer: impl Into<String>, is_friend: bool) -> Self {
        let peer = peer.into();
        Self {
            id: peer.clone(),
            name: peer,
            kind: if is_friend {
                SessionKind::PrivateFriend
            } else {
                SessionKind::PrivateTemp
            },
            is_friend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, content: &str) -> Message {
        Message {
            id: id.to_string(),
            session_id: "room1".into(),
            from: "alice".into(),
            content: content.to_string(),
            time: "2026-01-02T03:04:05Z".parse().unwrap(),
            is_system: false,
            kind: MessageKind::Text,
            is_nsfw: false,
            opaque_iv: None,
            conversation_id: None,
        }
    }

    #[test]
    fn compose_generates_distinct_ids() {
        let a = Message::compose(MessageKind::Text, "room1", "alice", "hi");
        let b = Message::compose(MessageKind::Text, "room1", "alice", "hi");
        assert!(a.has_id());
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("txt-room1-"));
    }

    #[test]
    fn dedup_prefers_id_when_both_have_one() {
        let a = msg("m1", "hello");
        let b = msg("m1", "completely different");
        assert!(a.dedup_matches(&b));

        let c = msg("m2", "hello");
        assert!(!a.dedup_matches(&c));
    }

    #[test]
    fn dedup_falls_back_to_triple_for_legacy_messages() {
        let a = msg("", "hello");
        let b = msg("m9", "hello");
        // Same content, from, and time: matched despite the missing id.
        assert!(a.dedup_matches(&b));

        let mut c = msg("", "hello");
        c.time = "2026-01-02T03:04:06Z".parse().unwrap();
        assert!(!a.dedup_matches(&c));
    }
}
