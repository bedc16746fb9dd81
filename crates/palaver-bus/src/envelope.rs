use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a bus envelope announces.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// A chat message was applied in the publishing window.
    NewMessage,
    /// A snapshot of a session's log, pushed to companions on handshake.
    SyncMessages,
    /// The room list changed; every window should refresh.
    RoomListUpdate,
    /// A companion window announces itself to its opener.
    ChildReady,
}

impl EnvelopeKind {
    /// Whether the publishing window re-delivers this envelope to itself.
    ///
    /// `NewMessage` is suppressed: the outbound path already applied the
    /// message directly, and re-delivering it would only bounce off the
    /// dedup ledger. List-refresh broadcasts are genuinely re-delivered.
    pub fn self_delivers(&self) -> bool {
        !matches!(self, Self::NewMessage)
    }
}

/// Which kind of window published an envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    /// A full window with its own socket.
    Main,
    /// A secondary window bound to one session, fed by its opener.
    Companion,
}

/// One broadcast on the bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    pub kind: EnvelopeKind,
    /// Kind-specific body, opaque to the bus itself.
    pub payload: serde_json::Value,
    /// Session this envelope is addressed to, if any.
    pub target_session: Option<String>,
    /// Suppresses re-broadcast loops via the dedup ledger.
    pub unique_id: String,
    pub origin_ts: DateTime<Utc>,
    pub source_role: SourceRole,
}

impl Envelope {
    pub fn new(
        kind: EnvelopeKind,
        payload: serde_json::Value,
        target_session: Option<String>,
        source_role: SourceRole,
    ) -> Self {
        Self {
            kind,
            payload,
            target_session,
            unique_id: uuid::Uuid::new_v4().to_string(),
            origin_ts: Utc::now(),
            source_role,
        }
    }
}
