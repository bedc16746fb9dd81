//! The explicit client context: every component the engine composes, owned
//! in one place and passed by reference, with no global mutable state.

use std::sync::Arc;

use tracing::{debug, warn};

use palaver_bus::{Envelope, EnvelopeKind};
use palaver_shared::protocol::{ChatPayload, ClientFrame};
use palaver_store::LocalStore;

use crate::history::HistorySync;
use crate::ledger::DedupLedger;
use crate::registry::ConversationRegistry;
use crate::router::RouteOutcome;
use crate::session::SessionBook;
use crate::sink::ViewSink;

/// Default number of cached messages loaded per session.
pub const LOCAL_CACHE_LIMIT: u32 = 50;

/// What applying a bus envelope did.
#[derive(Debug, PartialEq, Eq)]
pub enum EnvelopeOutcome {
    /// A `NewMessage` envelope went through the router.
    Routed(RouteOutcome),
    /// A `SyncMessages` snapshot merged this many new entries.
    Synced(usize),
    /// The room list was refreshed.
    RoomsUpdated,
    /// A companion announced itself; the bridge completes the handshake.
    ChildReady { session: String },
    /// The payload was malformed and dropped.
    Dropped,
}

/// Central state of one window's engine.
pub struct ClientContext {
    pub ledger: DedupLedger,
    pub registry: ConversationRegistry,
    pub store: LocalStore,
    pub sessions: SessionBook,
    pub sink: Arc<dyn ViewSink>,
    pub history: HistorySync,
    rooms: Vec<String>,
    friends: Vec<String>,
    visible_session: Option<String>,
}

impl ClientContext {
    /// Build a context over an opened store, seeding the ledger's deleted
    /// set from the durable tombstones.
    pub fn new(mut store: LocalStore, sink: Arc<dyn ViewSink>) -> Self {
        let mut ledger = DedupLedger::new();
        ledger.seed_deleted(store.deleted_ids());

        Self {
            ledger,
            registry: ConversationRegistry::new(),
            store,
            sessions: SessionBook::new(),
            sink,
            history: HistorySync::new(),
            rooms: Vec::new(),
            friends: Vec::new(),
            visible_session: None,
        }
    }

    /// Which session the window currently shows, if any.
    pub fn visible_session(&self) -> Option<&str> {
        self.visible_session.as_deref()
    }

    pub fn set_visible_session(&mut self, session_id: Option<String>) {
        self.visible_session = session_id;
    }

    pub fn rooms(&self) -> &[String] {
        &self.rooms
    }

    pub fn set_rooms(&mut self, rooms: Vec<String>) {
        self.rooms = rooms;
    }

    pub fn friends(&self) -> &[String] {
        &self.friends
    }

    /// Replace the friend list and register (or upgrade) a private session
    /// for every entry.
    pub fn set_friends(&mut self, friends: Vec<String>) {
        for peer in &friends {
            self.sessions.register_friend(peer);
        }
        self.friends = friends;
    }

    /// One-shot load of a session's cached history into memory.
    ///
    /// Idempotent: a second call for an already-populated session is a
    /// no-op guard, not a reload. Returns how many entries were loaded.
    pub fn load_local_cache(&mut self, session_id: &str, limit: u32) -> usize {
        if self
            .sessions
            .get(session_id)
            .is_some_and(|log| log.is_loaded())
        {
            return 0;
        }

        let cached = self.store.load_recent(session_id, limit);
        let log = self.sessions.ensure(session_id);

        let mut loaded = 0;
        for message in cached {
            // Claim the id so a live redelivery of a cached message is
            // rejected by the fast path.
            if message.has_id() {
                let _ = self.ledger.is_duplicate(&message.id);
            }
            if log.insert_sorted(message) {
                loaded += 1;
            }
        }
        log.mark_loaded();

        debug!(session = %session_id, loaded, "local cache loaded");
        loaded
    }

    /// User-initiated delete/recall: removes the message from memory and
    /// the store, and records the tombstone so no later history merge can
    /// resurrect it.
    pub fn delete_message(&mut self, session_id: &str, id: &str) {
        if let Some(log) = self.sessions.get_mut(session_id) {
            log.remove(id);
        }
        self.ledger.mark_deleted(id);
        if let Err(e) = self.store.delete_one(session_id, id) {
            warn!(session = %session_id, id = %id, error = %e, "delete persist failed");
        }

        if self.visible_session.as_deref() == Some(session_id) {
            self.sink.session_messages_changed(session_id);
        }
    }

    /// Frames to send after the identity handshake completes: refresh the
    /// room and friend lists, then register, cache-load, and history-request
    /// every known session.
    pub fn resync_frames(&mut self) -> Vec<ClientFrame> {
        let mut frames = vec![ClientFrame::RoomList, ClientFrame::FriendList];

        let mut ids = self.sessions.ids();
        ids.sort();
        for session_id in ids {
            frames.push(ClientFrame::Register {
                session: session_id.clone(),
            });
            self.load_local_cache(&session_id, LOCAL_CACHE_LIMIT);
            if let Some(request) = self.begin_history_request(&session_id) {
                frames.push(request);
            }
        }

        frames
    }

    /// Apply an envelope delivered by the broadcast bus. This is how a
    /// sibling window's traffic re-enters this window's router.
    pub fn apply_envelope(&mut self, envelope: Envelope) -> EnvelopeOutcome {
        match envelope.kind {
            EnvelopeKind::NewMessage => {
                let payload: ChatPayload = match serde_json::from_value(envelope.payload) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(error = %e, "malformed new-message envelope");
                        return EnvelopeOutcome::Dropped;
                    }
                };
                match payload.into_message() {
                    Ok(message) => EnvelopeOutcome::Routed(self.apply_incoming(message)),
                    Err(e) => {
                        warn!(error = %e, "invalid message in envelope");
                        EnvelopeOutcome::Dropped
                    }
                }
            }
            EnvelopeKind::SyncMessages => {
                let session = match envelope.target_session {
                    Some(session) => session,
                    None => return EnvelopeOutcome::Dropped,
                };
                let payloads: Vec<ChatPayload> =
                    match serde_json::from_value(envelope.payload) {
                        Ok(payloads) => payloads,
                        Err(e) => {
                            warn!(error = %e, "malformed sync envelope");
                            return EnvelopeOutcome::Dropped;
                        }
                    };

                let mut merged = 0;
                for payload in payloads {
                    if let Ok(mut message) = payload.into_message() {
                        if message.session_id.is_empty() {
                            message.session_id = session.clone();
                        }
                        if self.merge_message(message) {
                            merged += 1;
                        }
                    }
                }
                if merged > 0 && self.visible_session.as_deref() == Some(session.as_str()) {
                    self.sink.session_messages_changed(&session);
                }
                EnvelopeOutcome::Synced(merged)
            }
            EnvelopeKind::RoomListUpdate => {
                if let Ok(rooms) = serde_json::from_value::<Vec<String>>(envelope.payload) {
                    self.set_rooms(rooms);
                }
                EnvelopeOutcome::RoomsUpdated
            }
            EnvelopeKind::ChildReady => match envelope.target_session {
                Some(session) => EnvelopeOutcome::ChildReady { session },
                None => EnvelopeOutcome::Dropped,
            },
        }
    }

    /// Snapshot of a session's log as wire payloads, for `SyncMessages`
    /// pushes to companion windows.
    pub fn snapshot_payloads(&self, session_id: &str) -> Vec<ChatPayload> {
        self.sessions
            .get(session_id)
            .map(|log| {
                log.messages()
                    .iter()
                    .cloned()
                    .map(ChatPayload::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}
