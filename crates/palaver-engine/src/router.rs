//! The message router: applies one message to memory, store, and view.
//!
//! Both directions share one path: dedup-check, insert into the session's
//! ordered log, persist, signal the view layer. The differences are at the
//! edges: incoming messages may need conversation-id resolution and may
//! raise a passive notification; outgoing messages are applied synchronously
//! and are *not* broadcast to siblings (they receive the server's own
//! fan-out instead, which prevents double delivery).

use tracing::{debug, warn};

use palaver_shared::types::{Message, MessageKind};

use crate::context::ClientContext;
use crate::session::SessionLog;

/// What the router did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Applied,
    /// Already present (ledger hit or log match).
    Duplicate,
    /// The id carries a deletion tombstone.
    Deleted,
    /// Tagged only with a conversation id the registry cannot resolve;
    /// dropped rather than guessed into a same-named session.
    Unroutable,
}

impl ClientContext {
    /// Apply a message that arrived from the network or from a sibling
    /// window via the bus.
    pub fn apply_incoming(&mut self, message: Message) -> RouteOutcome {
        self.route(message, true)
    }

    /// Apply a message authored in this window. The caller sends it to the
    /// server afterwards; it is never broadcast to siblings.
    pub fn apply_outgoing(&mut self, message: Message) -> RouteOutcome {
        self.route(message, false)
    }

    fn route(&mut self, mut message: Message, incoming: bool) -> RouteOutcome {
        // Resolve a message tagged only with a conversation id. Unresolvable
        // means dropped: misfiling into a session that merely shares a
        // display name would be worse than losing the message.
        if message.session_id.is_empty() {
            let resolved = message
                .conversation_id
                .as_deref()
                .and_then(|conv| self.registry.session_for(conv))
                .map(str::to_string);
            match resolved {
                Some(session) => message.session_id = session,
                None => {
                    warn!(
                        conversation = message.conversation_id.as_deref().unwrap_or(""),
                        "dropping unroutable message"
                    );
                    return RouteOutcome::Unroutable;
                }
            }
        } else if let Some(conv) = message.conversation_id.clone() {
            // Any payload carrying both names feeds the registry.
            self.registry.remember(&message.session_id, conv);
        }

        if message.has_id() {
            if self.ledger.is_deleted(&message.id) {
                debug!(id = %message.id, "suppressing deleted message");
                return RouteOutcome::Deleted;
            }
            if self.ledger.is_duplicate(&message.id) {
                return RouteOutcome::Duplicate;
            }
        }

        let session_id = message.session_id.clone();
        let log = self.log_for(&session_id, message.kind);
        if !log.insert_sorted(message.clone()) {
            // Legacy id-less duplicates land here via the triple match.
            return RouteOutcome::Duplicate;
        }

        self.persist(&session_id, &message);

        let visible = self.visible_session() == Some(session_id.as_str());
        if visible {
            self.sink.session_messages_changed(&session_id);
        } else if incoming {
            let preview = preview_of(&message);
            self.sink.session_notify(&session_id, &preview);
        }

        RouteOutcome::Applied
    }

    /// Merge one message without raising view signals; used by history
    /// responses and snapshot syncs, which signal once per batch.
    pub(crate) fn merge_message(&mut self, message: Message) -> bool {
        if message.has_id() {
            if self.ledger.is_deleted(&message.id) {
                return false;
            }
            if self.ledger.is_duplicate(&message.id) {
                return false;
            }
        }

        let session_id = message.session_id.clone();
        let log = self.log_for(&session_id, message.kind);
        if !log.insert_sorted(message.clone()) {
            return false;
        }

        self.persist(&session_id, &message);
        true
    }

    /// Private traffic registers the peer as a private session; everything
    /// else defaults to a room.
    fn log_for(&mut self, session_id: &str, kind: MessageKind) -> &mut SessionLog {
        if kind == MessageKind::Private {
            self.sessions.ensure_private(session_id)
        } else {
            self.sessions.ensure(session_id)
        }
    }

    /// Persist one inserted message and advance the session watermark past
    /// it. A storage failure degrades the store, never the router.
    fn persist(&mut self, session_id: &str, message: &Message) {
        if let Err(e) = self.store.save(message) {
            warn!(session = %session_id, error = %e, "message persist failed");
        } else if self
            .store
            .watermark(session_id)
            .map_or(true, |w| message.time > w)
        {
            let _ = self.store.set_watermark(session_id, message.time);
        }
    }
}

fn preview_of(message: &Message) -> String {
    let mut body: String = message.content.chars().take(64).collect();
    if body.len() < message.content.len() {
        body.push('…');
    }
    format!("{}: {}", message.from, body)
}

/// Timestamp helper for tests below.
#[cfg(test)]
fn at(secs: i64) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::from_timestamp(1_760_000_000 + secs, 0).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullSink;
    use palaver_shared::types::MessageKind;
    use palaver_store::{LocalStore, StoreConfig};
    use std::sync::Arc;

    fn context(dir: &tempfile::TempDir) -> ClientContext {
        let store = LocalStore::open(&StoreConfig {
            db_path: dir.path().join("test.db"),
            fallback_path: dir.path().join("fb.json"),
            force_fallback: false,
        });
        ClientContext::new(store, Arc::new(NullSink))
    }

    fn msg(id: &str, secs: i64) -> Message {
        Message {
            id: id.to_string(),
            session_id: "room1".into(),
            from: "alice".into(),
            content: format!("m {id}"),
            time: at(secs),
            is_system: false,
            kind: MessageKind::Text,
            is_nsfw: false,
            opaque_iv: None,
            conversation_id: None,
        }
    }

    #[test]
    fn idempotent_merge() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);

        assert_eq!(ctx.apply_incoming(msg("m1", 1)), RouteOutcome::Applied);
        assert_eq!(ctx.apply_incoming(msg("m1", 1)), RouteOutcome::Duplicate);

        let log = ctx.sessions.get("room1").unwrap();
        assert_eq!(log.messages().len(), 1);
    }

    #[test]
    fn log_stays_ordered_under_out_of_order_arrival() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);

        for (id, secs) in [("c", 30), ("a", 10), ("d", 40), ("b", 20)] {
            ctx.apply_incoming(msg(id, secs));
        }

        let log = ctx.sessions.get("room1").unwrap();
        assert!(log.messages().windows(2).all(|w| w[0].time <= w[1].time));
        assert_eq!(log.messages().len(), 4);
    }

    #[test]
    fn unroutable_conversation_id_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);

        let mut orphan = msg("m1", 1);
        orphan.session_id = String::new();
        orphan.conversation_id = Some("c-unknown".into());
        assert_eq!(ctx.apply_incoming(orphan), RouteOutcome::Unroutable);
        assert!(ctx.sessions.is_empty());
    }

    #[test]
    fn conversation_id_resolves_after_mapping_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);

        // First message carries both names and seeds the registry.
        let mut seed = msg("m1", 1);
        seed.conversation_id = Some("c-77".into());
        assert_eq!(ctx.apply_incoming(seed), RouteOutcome::Applied);

        // Second arrives tagged only with the conversation id.
        let mut tagged = msg("m2", 2);
        tagged.session_id = String::new();
        tagged.conversation_id = Some("c-77".into());
        assert_eq!(ctx.apply_incoming(tagged), RouteOutcome::Applied);
        assert_eq!(ctx.sessions.get("room1").unwrap().messages().len(), 2);
    }

    #[test]
    fn deleted_message_is_suppressed() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);

        ctx.apply_incoming(msg("m1", 1));
        ctx.delete_message("room1", "m1");
        assert!(ctx.sessions.get("room1").unwrap().messages().is_empty());

        assert_eq!(ctx.apply_incoming(msg("m1", 1)), RouteOutcome::Deleted);
        assert!(ctx.sessions.get("room1").unwrap().messages().is_empty());
    }

    #[test]
    fn legacy_id_less_duplicate_caught_by_triple() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);

        let mut legacy = msg("", 5);
        legacy.content = "same words".into();
        assert_eq!(ctx.apply_incoming(legacy.clone()), RouteOutcome::Applied);
        assert_eq!(ctx.apply_incoming(legacy), RouteOutcome::Duplicate);
        assert_eq!(ctx.sessions.get("room1").unwrap().messages().len(), 1);
    }

    #[test]
    fn outgoing_applies_once_then_server_echo_is_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);

        let authored = Message::compose(MessageKind::Text, "room1", "me", "hello");
        assert_eq!(ctx.apply_outgoing(authored.clone()), RouteOutcome::Applied);
        // The server fans the same message back to this window.
        assert_eq!(ctx.apply_incoming(authored), RouteOutcome::Duplicate);
        assert_eq!(ctx.sessions.get("room1").unwrap().messages().len(), 1);
    }

    #[test]
    fn two_windows_converge_on_one_stored_copy() {
        // Two windows share the database file but have independent ledgers.
        let dir = tempfile::tempdir().unwrap();
        let open = |name: &str| {
            LocalStore::open(&StoreConfig {
                db_path: dir.path().join("shared.db"),
                fallback_path: dir.path().join(name),
                force_fallback: false,
            })
        };
        let mut a = ClientContext::new(open("fb-a.json"), Arc::new(NullSink));
        let mut b = ClientContext::new(open("fb-b.json"), Arc::new(NullSink));

        let x = msg("X", 0);
        assert_eq!(a.apply_incoming(x.clone()), RouteOutcome::Applied);
        assert_eq!(b.apply_incoming(x), RouteOutcome::Applied);

        assert_eq!(a.sessions.get("room1").unwrap().messages().len(), 1);
        assert_eq!(b.sessions.get("room1").unwrap().messages().len(), 1);
        // One row in the shared store despite both windows persisting.
        let rows = a.store.load_recent("room1", 10);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "X");
    }

    #[test]
    fn private_message_registers_private_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);

        let mut dm = msg("p1", 1);
        dm.session_id = "bob".into();
        dm.from = "bob".into();
        dm.kind = MessageKind::Private;
        assert_eq!(ctx.apply_incoming(dm), RouteOutcome::Applied);

        let session = &ctx.sessions.get("bob").unwrap().session;
        assert_eq!(session.kind, palaver_shared::types::SessionKind::PrivateTemp);
        assert!(!session.is_friend);

        // Room traffic for a known room still registers a room session.
        ctx.apply_incoming(msg("m1", 2));
        let session = &ctx.sessions.get("room1").unwrap().session;
        assert_eq!(session.kind, palaver_shared::types::SessionKind::Room);
    }

    #[test]
    fn watermark_advances_with_persisted_messages() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);

        ctx.apply_incoming(msg("m1", 10));
        assert_eq!(ctx.store.watermark("room1"), Some(at(10)));

        // An older message does not move the watermark backwards.
        ctx.apply_incoming(msg("m0", 5));
        assert_eq!(ctx.store.watermark("room1"), Some(at(10)));
    }
}
