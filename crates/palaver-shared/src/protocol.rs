//! Wire protocol frames exchanged with the server.
//!
//! Every socket message is exactly one JSON-encoded frame. The enums are
//! closed: an unrecognized `type` tag fails deserialization at the boundary
//! instead of leaking a duck-typed payload into the router.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{Message, MessageKind};

/// Frames sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Present the already-issued identity token.
    Auth { token: String },
    /// A chat message authored in this window.
    Chat(ChatPayload),
    /// Announce interest in a session so the server fans its traffic in.
    Register { session: String },
    /// Watermark-bounded history request for one session.
    HistoryRequest {
        session: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
        /// Local watermark; the server returns only strictly newer entries.
        since: DateTime<Utc>,
    },
    /// Ask for the current room list.
    RoomList,
    /// Ask for the authenticated user's friend list.
    FriendList,
}

/// Frames sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Identity handshake completed.
    AuthOk { user: String },
    /// A chat message fanned out by the server.
    Chat(ChatPayload),
    /// Response to a `HistoryRequest`.
    HistoryResponse {
        session: String,
        #[serde(default)]
        conversation_id: Option<String>,
        messages: Vec<ChatPayload>,
    },
    /// Current room list.
    RoomList { rooms: Vec<String> },
    /// The authenticated user's current friend list.
    FriendList { friends: Vec<String> },
    /// Server assigned (or re-announced) a conversation id for a session.
    ConversationAssigned {
        session: String,
        conversation_id: String,
    },
    /// Server-side failure report.
    Error { reason: String },
}

/// The on-wire shape of a message: [`Message`] minus local-only state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatPayload {
    #[serde(default)]
    pub id: String,
    pub session: String,
    pub from: String,
    pub content: String,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub is_system: bool,
    pub kind: MessageKind,
    #[serde(default)]
    pub is_nsfw: bool,
    #[serde(default)]
    pub opaque_iv: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl ChatPayload {
    /// Validate and convert a decoded payload into a domain [`Message`].
    ///
    /// A payload with no id must at least carry the content+from+time triple
    /// (i.e. a non-empty sender) or it has no identity at all and is dropped
    /// at the boundary.
    pub fn into_message(self) -> Result<Message, ProtocolError> {
        if self.id.is_empty() && self.from.is_empty() {
            return Err(ProtocolError::Unidentifiable);
        }
        if self.session.is_empty() && self.conversation_id.is_none() {
            return Err(ProtocolError::Malformed("payload names no session".into()));
        }
        Ok(Message {
            id: self.id,
            session_id: self.session,
            from: self.from,
            content: self.content,
            time: self.time,
            is_system: self.is_system,
            kind: self.kind,
            is_nsfw: self.is_nsfw,
            opaque_iv: self.opaque_iv,
            conversation_id: self.conversation_id,
        })
    }
}

impl From<Message> for ChatPayload {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            session: m.session_id,
            from: m.from,
            content: m.content,
            time: m.time,
            is_system: m.is_system,
            kind: m.kind,
            is_nsfw: m.is_nsfw,
            opaque_iv: m.opaque_iv,
            conversation_id: m.conversation_id,
        }
    }
}

impl ClientFrame {
    /// Serialize to the single framed text payload sent per socket message.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerFrame {
    /// Decode and validate a frame received from the server.
    pub fn from_text(text: &str) -> Result<Self, ProtocolError> {
        if text.len() > crate::constants::MAX_FRAME_SIZE {
            return Err(ProtocolError::Oversized);
        }
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}
