//! The notification bridge: one loop that drives the engine from socket
//! notifications, bus envelopes, and user commands.
//!
//! Everything stateful lives in the [`Bridge`]; the loop owns it exclusively
//! so no lock sits between the socket and the router. Sealed payloads are
//! unsealed here, at the boundary, before the engine ever sees them.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use palaver_bus::bus::FirstBroadcastFn;
use palaver_bus::{BroadcastBus, CompanionTable, Envelope, EnvelopeKind};
use palaver_engine::{BoundedIdSet, ClientContext, EnvelopeOutcome, RouteOutcome, ViewSink};
use palaver_net::{SocketCommand, SocketNotification};
use palaver_shared::crypto::{self, SymmetricKey};
use palaver_shared::protocol::{ChatPayload, ClientFrame, ServerFrame};
use palaver_shared::types::{Message, MessageKind, Session};

/// How often dead companion handles are swept.
const COMPANION_SWEEP_SECS: u64 = 30;

/// A parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send a chat message to a session.
    Chat { session: String, content: String },
    /// Register a room and request its history.
    Join { session: String },
    /// Delete one message everywhere.
    Delete { session: String, id: String },
    /// Close the connection with a normal closure and exit.
    Logout,
}

/// Parse one input line. `/join room`, `/delete room id`, `/quit`, or
/// `room text...` to chat. Returns `None` for blank or malformed lines.
pub fn parse_line(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(rest) = line.strip_prefix("/join ") {
        let session = rest.trim();
        if session.is_empty() {
            return None;
        }
        return Some(Command::Join {
            session: session.to_string(),
        });
    }
    if let Some(rest) = line.strip_prefix("/delete ") {
        let (session, id) = rest.trim().split_once(' ')?;
        return Some(Command::Delete {
            session: session.to_string(),
            id: id.trim().to_string(),
        });
    }
    if line == "/quit" {
        return Some(Command::Logout);
    }
    if line.starts_with('/') {
        return None;
    }

    let (session, content) = line.split_once(' ')?;
    Some(Command::Chat {
        session: session.to_string(),
        content: content.trim().to_string(),
    })
}

/// Ledger hook for the bus: the broadcast set of envelope ids, shared with
/// the pump task that suppresses re-broadcast loops.
pub fn broadcast_ledger_hook() -> FirstBroadcastFn {
    let ids = Arc::new(Mutex::new(BoundedIdSet::default()));
    Arc::new(move |id: &str| match ids.lock() {
        Ok(mut set) => set.insert(id),
        Err(poisoned) => poisoned.into_inner().insert(id),
    })
}

/// Sink that reports view signals as log lines; the whole rendering layer
/// of this headless client.
#[derive(Debug, Default)]
pub struct TraceSink;

impl ViewSink for TraceSink {
    fn session_messages_changed(&self, session_id: &str) {
        info!(session = %session_id, "session updated");
    }

    fn session_notify(&self, session_id: &str, preview: &str) {
        info!(session = %session_id, preview = %preview, "new message");
    }
}

/// Owns the engine context and everything the loop dispatches into.
pub struct Bridge {
    ctx: ClientContext,
    bus: BroadcastBus,
    companions: CompanionTable,
    cmd_tx: mpsc::Sender<SocketCommand>,
    username: String,
    content_key: Option<SymmetricKey>,
}

impl Bridge {
    pub fn new(
        ctx: ClientContext,
        bus: BroadcastBus,
        cmd_tx: mpsc::Sender<SocketCommand>,
        username: String,
        content_key: Option<SymmetricKey>,
    ) -> Self {
        Self {
            ctx,
            bus,
            companions: CompanionTable::new(),
            cmd_tx,
            username,
            content_key,
        }
    }

    /// Register rooms ahead of the first connection so the resync covers
    /// them.
    pub fn register_rooms(&mut self, rooms: &[String]) {
        for room in rooms {
            self.ctx.sessions.register(Session::room(room));
        }
    }

    /// Record a companion window's delivery handle for one session.
    pub fn register_companion(&mut self, session: impl Into<String>, handle: mpsc::Sender<Envelope>) {
        self.companions.register(session, handle);
    }

    /// Run until logout, terminal connection failure, or the socket task
    /// going away.
    pub async fn run(
        mut self,
        mut notif_rx: mpsc::Receiver<SocketNotification>,
        mut envelope_rx: mpsc::Receiver<Envelope>,
        mut command_rx: mpsc::Receiver<Command>,
    ) {
        let mut sweep = tokio::time::interval(Duration::from_secs(COMPANION_SWEEP_SECS));
        info!("bridge started");

        loop {
            tokio::select! {
                notif = notif_rx.recv() => match notif {
                    Some(notif) => {
                        if !self.handle_notification(notif).await {
                            return;
                        }
                    }
                    None => return,
                },
                envelope = envelope_rx.recv() => match envelope {
                    Some(envelope) => self.handle_envelope(envelope).await,
                    None => return,
                },
                command = command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => return,
                },
                _ = sweep.tick() => self.companions.sweep(),
            }
        }
    }

    /// Returns whether the loop should keep running.
    async fn handle_notification(&mut self, notif: SocketNotification) -> bool {
        match notif {
            SocketNotification::Connected { user } => {
                info!(user = %user, "connected; resyncing");
                for frame in self.ctx.resync_frames() {
                    self.send(frame).await;
                }
                true
            }
            SocketNotification::Frame(frame) => {
                self.handle_frame(frame).await;
                true
            }
            SocketNotification::ConnectionLost => {
                // In-flight history requests will never be answered.
                for session in self.ctx.sessions.ids() {
                    self.ctx.abort_history_request(&session);
                }
                true
            }
            SocketNotification::ReconnectScheduled { attempt, delay } => {
                info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");
                true
            }
            SocketNotification::Failed => {
                warn!("connection failed for good; exiting");
                false
            }
            SocketNotification::LoggedOut => {
                info!("logged out; exiting");
                false
            }
        }
    }

    async fn handle_frame(&mut self, frame: ServerFrame) {
        match frame {
            ServerFrame::Chat(payload) => {
                let payload = self.unseal(payload);
                let message = match payload.clone().into_message() {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(error = %e, "dropping invalid chat payload");
                        return;
                    }
                };
                let session = message.session_id.clone();

                match self.ctx.apply_incoming(message) {
                    RouteOutcome::Applied => {
                        self.republish_new_message(payload, session).await;
                    }
                    outcome => debug!(?outcome, "chat frame not applied"),
                }
            }

            ServerFrame::HistoryResponse {
                session,
                conversation_id,
                messages,
            } => {
                let messages: Vec<ChatPayload> = messages
                    .into_iter()
                    .map(|payload| self.unseal(payload))
                    .collect();
                let added = self
                    .ctx
                    .apply_history_response(&session, conversation_id, messages);
                if added > 0 {
                    self.push_snapshot(&session);
                }
            }

            ServerFrame::RoomList { rooms } => {
                for room in &rooms {
                    self.ctx.sessions.register(Session::room(room));
                }
                match serde_json::to_value(&rooms) {
                    Ok(payload) => {
                        // Self-delivers: our own room list refreshes through
                        // the same envelope the siblings receive.
                        if let Err(e) = self
                            .bus
                            .publish(EnvelopeKind::RoomListUpdate, payload, None)
                            .await
                        {
                            warn!(error = %e, "room list broadcast failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "room list unencodable"),
                }
            }

            ServerFrame::FriendList { friends } => {
                debug!(count = friends.len(), "friend list refreshed");
                self.ctx.set_friends(friends);
            }

            ServerFrame::ConversationAssigned {
                session,
                conversation_id,
            } => {
                debug!(session = %session, conversation = %conversation_id, "conversation assigned");
                self.ctx.registry.remember(session, conversation_id);
            }

            ServerFrame::Error { reason } => {
                warn!(reason = %reason, "server error");
            }

            // The socket task turns this into `Connected` before it gets
            // here; seeing it again means a misbehaving server.
            ServerFrame::AuthOk { user } => {
                debug!(user = %user, "unexpected repeated auth_ok");
            }
        }
    }

    async fn handle_envelope(&mut self, envelope: Envelope) {
        let kind = envelope.kind;
        let target = envelope.target_session.clone();

        match self.ctx.apply_envelope(envelope.clone()) {
            EnvelopeOutcome::ChildReady { session } => {
                // Complete the handshake with a full snapshot.
                self.push_snapshot(&session);
            }
            EnvelopeOutcome::Routed(RouteOutcome::Applied) => {
                if kind == EnvelopeKind::NewMessage {
                    if let Some(session) = target {
                        self.companions.push(&session, envelope);
                    }
                }
            }
            outcome => debug!(?outcome, "envelope handled"),
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Chat { session, content } => {
                let message =
                    Message::compose(MessageKind::Text, session, self.username.clone(), content);
                self.ctx.apply_outgoing(message.clone());

                let wire = match self.seal(message) {
                    Some(wire) => wire,
                    None => return,
                };
                self.send(ClientFrame::Chat(ChatPayload::from(wire))).await;
            }
            Command::Join { session } => {
                self.ctx.sessions.register(Session::room(&session));
                self.send(ClientFrame::Register {
                    session: session.clone(),
                })
                .await;
                self.ctx
                    .load_local_cache(&session, palaver_engine::LOCAL_CACHE_LIMIT);
                if let Some(request) = self.ctx.begin_history_request(&session) {
                    self.send(request).await;
                }
            }
            Command::Delete { session, id } => {
                self.ctx.delete_message(&session, &id);
            }
            Command::Logout => {
                if self.cmd_tx.send(SocketCommand::Logout).await.is_err() {
                    warn!("socket task already gone");
                }
            }
        }
    }

    async fn send(&self, frame: ClientFrame) {
        if self.cmd_tx.send(SocketCommand::Send(frame)).await.is_err() {
            warn!("socket task gone; frame dropped");
        }
    }

    /// Broadcast an applied server message to sibling windows and push it to
    /// the session's companion, if one is attached.
    async fn republish_new_message(&mut self, payload: ChatPayload, session: String) {
        let value = match serde_json::to_value(&payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "chat payload unencodable for bus");
                return;
            }
        };
        match self
            .bus
            .publish(EnvelopeKind::NewMessage, value, Some(session.clone()))
            .await
        {
            Ok(envelope) => {
                self.companions.push(&session, envelope);
            }
            Err(e) => warn!(error = %e, "bus publish failed"),
        }
    }

    /// Push the full session snapshot to that session's companion window.
    fn push_snapshot(&mut self, session: &str) {
        let payloads = self.ctx.snapshot_payloads(session);
        match serde_json::to_value(&payloads) {
            Ok(value) => {
                let envelope = Envelope::new(
                    EnvelopeKind::SyncMessages,
                    value,
                    Some(session.to_string()),
                    palaver_bus::SourceRole::Main,
                );
                self.companions.push(session, envelope);
            }
            Err(e) => warn!(error = %e, "snapshot unencodable"),
        }
    }

    /// Decrypt an opaque payload at the boundary. Undecryptable content is
    /// kept opaque rather than dropped; the engine stores it as-is.
    fn unseal(&self, mut payload: ChatPayload) -> ChatPayload {
        let key = match (&self.content_key, &payload.opaque_iv) {
            (Some(key), Some(_)) => key,
            _ => return payload,
        };
        let iv = match payload.opaque_iv.take() {
            Some(iv) => iv,
            None => return payload,
        };

        match crypto::decrypt(key, &payload.content, &iv) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => {
                    payload.content = text;
                    payload.opaque_iv = None;
                }
                Err(_) => {
                    warn!(id = %payload.id, "decrypted payload is not utf-8; kept opaque");
                    payload.opaque_iv = Some(iv);
                }
            },
            Err(e) => {
                warn!(id = %payload.id, error = %e, "undecryptable payload kept opaque");
                payload.opaque_iv = Some(iv);
            }
        }
        payload
    }

    /// Seal an authored message for the wire when a content key is set. The
    /// local copy stays plaintext; the server echo deduplicates by id.
    fn seal(&self, mut message: Message) -> Option<Message> {
        let key = match &self.content_key {
            Some(key) => key,
            None => return Some(message),
        };
        match crypto::encrypt(key, message.content.as_bytes()) {
            Ok((ciphertext, iv)) => {
                message.content = ciphertext;
                message.opaque_iv = Some(iv);
                Some(message)
            }
            Err(e) => {
                warn!(error = %e, "seal failed; message not sent");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use palaver_bus::ProcessHub;
    use palaver_engine::NullSink;
    use palaver_store::{LocalStore, StoreConfig};

    fn bridge_on(
        hub: &ProcessHub,
        dir: &tempfile::TempDir,
        key: Option<SymmetricKey>,
    ) -> (Bridge, mpsc::Receiver<Envelope>, mpsc::Receiver<SocketCommand>) {
        let store = LocalStore::open(&StoreConfig {
            db_path: dir.path().join("test.db"),
            fallback_path: dir.path().join("fb.json"),
            force_fallback: false,
        });
        let ctx = ClientContext::new(store, Arc::new(NullSink));
        let (bus, envelope_rx) =
            BroadcastBus::new(hub.attach(), palaver_bus::SourceRole::Main, broadcast_ledger_hook());
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let bridge = Bridge::new(ctx, bus, cmd_tx, "alice".into(), key);
        (bridge, envelope_rx, cmd_rx)
    }

    fn chat_payload(id: &str, session: &str) -> ChatPayload {
        ChatPayload {
            id: id.to_string(),
            session: session.to_string(),
            from: "bob".into(),
            content: "hi".into(),
            time: chrono::Utc::now(),
            is_system: false,
            kind: MessageKind::Text,
            is_nsfw: false,
            opaque_iv: None,
            conversation_id: None,
        }
    }

    #[test]
    fn line_parsing() {
        assert_eq!(
            parse_line("lobby hello there"),
            Some(Command::Chat {
                session: "lobby".into(),
                content: "hello there".into()
            })
        );
        assert_eq!(
            parse_line("/join dev"),
            Some(Command::Join {
                session: "dev".into()
            })
        );
        assert_eq!(
            parse_line("/delete lobby txt-lobby-1-ff"),
            Some(Command::Delete {
                session: "lobby".into(),
                id: "txt-lobby-1-ff".into()
            })
        );
        assert_eq!(parse_line("/quit"), Some(Command::Logout));
        assert_eq!(parse_line(""), None);
        assert_eq!(parse_line("   "), None);
        assert_eq!(parse_line("/unknown"), None);
        assert_eq!(parse_line("loneword"), None);
    }

    #[tokio::test]
    async fn applied_chat_frame_reaches_sibling_windows() {
        let hub = ProcessHub::new(16);
        let dir = tempfile::tempdir().unwrap();
        let (mut bridge, _rx, _cmd_rx) = bridge_on(&hub, &dir, None);

        let sibling = hub.attach();
        let mut sibling_rx = sibling.subscribe();
        tokio::task::yield_now().await;

        bridge
            .handle_frame(ServerFrame::Chat(chat_payload("m1", "lobby")))
            .await;

        let env = tokio::time::timeout(Duration::from_millis(300), sibling_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(env.kind, EnvelopeKind::NewMessage);
        assert_eq!(env.target_session.as_deref(), Some("lobby"));
    }

    #[tokio::test]
    async fn duplicate_chat_frame_is_not_republished() {
        let hub = ProcessHub::new(16);
        let dir = tempfile::tempdir().unwrap();
        let (mut bridge, _rx, _cmd_rx) = bridge_on(&hub, &dir, None);

        let sibling = hub.attach();
        let mut sibling_rx = sibling.subscribe();
        tokio::task::yield_now().await;

        bridge
            .handle_frame(ServerFrame::Chat(chat_payload("m1", "lobby")))
            .await;
        bridge
            .handle_frame(ServerFrame::Chat(chat_payload("m1", "lobby")))
            .await;

        assert!(sibling_rx.recv().await.is_some());
        let second = tokio::time::timeout(Duration::from_millis(200), sibling_rx.recv()).await;
        assert!(second.is_err(), "duplicate went over the bus");
    }

    #[tokio::test]
    async fn child_ready_is_answered_with_a_snapshot() {
        let hub = ProcessHub::new(16);
        let dir = tempfile::tempdir().unwrap();
        let (mut bridge, _rx, _cmd_rx) = bridge_on(&hub, &dir, None);

        bridge
            .handle_frame(ServerFrame::Chat(chat_payload("m1", "lobby")))
            .await;

        let (handle, mut companion_rx) = mpsc::channel(4);
        bridge.register_companion("lobby", handle);

        let ready = Envelope::new(
            EnvelopeKind::ChildReady,
            serde_json::Value::Null,
            Some("lobby".into()),
            palaver_bus::SourceRole::Companion,
        );
        bridge.handle_envelope(ready).await;

        let snapshot = companion_rx.recv().await.unwrap();
        assert_eq!(snapshot.kind, EnvelopeKind::SyncMessages);
        let payloads: Vec<ChatPayload> = serde_json::from_value(snapshot.payload).unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].id, "m1");
    }

    #[tokio::test]
    async fn sealed_payload_is_unsealed_at_the_boundary() {
        let hub = ProcessHub::new(16);
        let dir = tempfile::tempdir().unwrap();
        let key = crypto::generate_symmetric_key();
        let (bridge, _rx, _cmd_rx) = bridge_on(&hub, &dir, Some(key));

        let (ciphertext, iv) = crypto::encrypt(&key, b"the plan").unwrap();
        let mut payload = chat_payload("m1", "lobby");
        payload.content = ciphertext;
        payload.opaque_iv = Some(iv);

        let unsealed = bridge.unseal(payload);
        assert_eq!(unsealed.content, "the plan");
        assert!(unsealed.opaque_iv.is_none());
    }

    #[tokio::test]
    async fn undecryptable_payload_stays_opaque() {
        let hub = ProcessHub::new(16);
        let dir = tempfile::tempdir().unwrap();
        let key = crypto::generate_symmetric_key();
        let other = crypto::generate_symmetric_key();
        let (bridge, _rx, _cmd_rx) = bridge_on(&hub, &dir, Some(other));

        let (ciphertext, iv) = crypto::encrypt(&key, b"lost forever").unwrap();
        let mut payload = chat_payload("m1", "lobby");
        payload.content = ciphertext.clone();
        payload.opaque_iv = Some(iv.clone());

        let kept = bridge.unseal(payload);
        assert_eq!(kept.content, ciphertext);
        assert_eq!(kept.opaque_iv, Some(iv));
    }

    #[tokio::test]
    async fn chat_command_applies_locally_and_sends_sealed_frame() {
        let hub = ProcessHub::new(16);
        let dir = tempfile::tempdir().unwrap();
        let key = crypto::generate_symmetric_key();
        let (mut bridge, _rx, mut cmd_rx) = bridge_on(&hub, &dir, Some(key));

        bridge
            .handle_command(Command::Chat {
                session: "lobby".into(),
                content: "hello".into(),
            })
            .await;

        // Local log keeps the plaintext copy.
        let local = &bridge.ctx.sessions.get("lobby").unwrap().messages()[0];
        assert_eq!(local.content, "hello");
        assert!(local.opaque_iv.is_none());

        // The wire copy is sealed and decrypts back to the plaintext.
        let sent = cmd_rx.recv().await.unwrap();
        let payload = match sent {
            SocketCommand::Send(ClientFrame::Chat(payload)) => payload,
            other => panic!("expected chat frame, got {other:?}"),
        };
        let iv = payload.opaque_iv.expect("sealed payload carries IV");
        assert_ne!(payload.content, "hello");
        assert_eq!(crypto::decrypt(&key, &payload.content, &iv).unwrap(), b"hello");
        assert_eq!(payload.id, local.id);
    }

    #[tokio::test]
    async fn room_list_frame_registers_sessions_and_broadcasts() {
        let hub = ProcessHub::new(16);
        let dir = tempfile::tempdir().unwrap();
        let (mut bridge, _rx, _cmd_rx) = bridge_on(&hub, &dir, None);

        let sibling = hub.attach();
        let mut sibling_rx = sibling.subscribe();
        tokio::task::yield_now().await;

        bridge
            .handle_frame(ServerFrame::RoomList {
                rooms: vec!["lobby".into(), "dev".into()],
            })
            .await;

        assert_eq!(bridge.ctx.sessions.len(), 2);
        let env = tokio::time::timeout(Duration::from_millis(300), sibling_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(env.kind, EnvelopeKind::RoomListUpdate);
    }

    #[tokio::test]
    async fn friend_list_frame_registers_friend_sessions() {
        let hub = ProcessHub::new(16);
        let dir = tempfile::tempdir().unwrap();
        let (mut bridge, _rx, _cmd_rx) = bridge_on(&hub, &dir, None);

        bridge
            .handle_frame(ServerFrame::FriendList {
                friends: vec!["bob".into()],
            })
            .await;

        let session = &bridge.ctx.sessions.get("bob").unwrap().session;
        assert_eq!(session.kind, palaver_shared::types::SessionKind::PrivateFriend);
        assert!(session.is_friend);
        assert_eq!(bridge.ctx.friends(), ["bob".to_string()]);
    }
}
