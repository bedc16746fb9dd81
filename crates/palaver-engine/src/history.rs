//! History sync protocol.
//!
//! One watermark-bounded request per session at a time. The response merges
//! under the standard dedup rule, skips tombstoned ids, and advances the
//! watermark to *now*, not to the newest returned timestamp, so the next
//! request never re-covers ground this one already proved synced.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use palaver_shared::protocol::{ChatPayload, ClientFrame};

use crate::context::ClientContext;

/// Per-session in-flight request flags.
#[derive(Debug, Default)]
pub struct HistorySync {
    in_flight: HashSet<String>,
}

impl HistorySync {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the in-flight slot for a session. Returns whether the caller
    /// may issue a request.
    pub fn begin(&mut self, session_id: &str) -> bool {
        self.in_flight.insert(session_id.to_string())
    }

    /// Release the slot once a response (including an empty or invalid one)
    /// has been processed.
    pub fn finish(&mut self, session_id: &str) {
        self.in_flight.remove(session_id);
    }

    pub fn is_in_flight(&self, session_id: &str) -> bool {
        self.in_flight.contains(session_id)
    }
}

impl ClientContext {
    /// Build the history request for a session, or `None` when one is
    /// already in flight.
    ///
    /// The request carries the best local watermark: the stored sync
    /// watermark, else the newest cached message's timestamp, else the
    /// epoch.
    pub fn begin_history_request(&mut self, session_id: &str) -> Option<ClientFrame> {
        if !self.history.begin(session_id) {
            debug!(session = %session_id, "history request already in flight");
            return None;
        }

        let since = self
            .store
            .watermark(session_id)
            .or_else(|| self.store.latest_timestamp(session_id))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        Some(ClientFrame::HistoryRequest {
            session: session_id.to_string(),
            conversation_id: self
                .registry
                .conversation_for(session_id)
                .map(str::to_string),
            since,
        })
    }

    /// Merge a history response. Returns how many new entries were added.
    ///
    /// The watermark advances to now even when nothing new arrived: the
    /// server just proved there is nothing older left to fetch.
    pub fn apply_history_response(
        &mut self,
        session_id: &str,
        conversation_id: Option<String>,
        payloads: Vec<ChatPayload>,
    ) -> usize {
        if let Some(conv) = conversation_id {
            self.registry.remember(session_id, conv);
        }

        let mut added = 0;
        for payload in payloads {
            let mut message = match payload.into_message() {
                Ok(message) => message,
                Err(e) => {
                    debug!(session = %session_id, error = %e, "skipping invalid history entry");
                    continue;
                }
            };
            if message.session_id.is_empty() {
                message.session_id = session_id.to_string();
            }
            if self.merge_message(message) {
                added += 1;
            }
        }

        let _ = self.store.set_watermark(session_id, Utc::now());
        self.history.finish(session_id);

        if added > 0 && self.visible_session() == Some(session_id) {
            self.sink.session_messages_changed(session_id);
        }

        debug!(session = %session_id, added, "history response merged");
        added
    }

    /// A response came back unusable; just release the in-flight slot.
    pub fn abort_history_request(&mut self, session_id: &str) {
        self.history.finish(session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullSink;
    use palaver_shared::types::{Message, MessageKind};
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

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_760_000_000 + secs, 0).unwrap()
    }

    fn payload(id: &str, secs: i64) -> ChatPayload {
        ChatPayload {
            id: id.to_string(),
            session: "room1".into(),
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
    fn request_carries_watermark_and_conversation_id() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);
        ctx.registry.remember("room1", "c-77");
        ctx.store.set_watermark("room1", at(5)).unwrap();

        let frame = ctx.begin_history_request("room1").unwrap();
        match frame {
            ClientFrame::HistoryRequest {
                session,
                conversation_id,
                since,
            } => {
                assert_eq!(session, "room1");
                assert_eq!(conversation_id.as_deref(), Some("c-77"));
                assert_eq!(since, at(5));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn fresh_session_requests_from_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);

        match ctx.begin_history_request("room1").unwrap() {
            ClientFrame::HistoryRequest { since, .. } => {
                assert_eq!(since, DateTime::<Utc>::UNIX_EPOCH);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn in_flight_flag_blocks_concurrent_requests() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);

        assert!(ctx.begin_history_request("room1").is_some());
        assert!(ctx.begin_history_request("room1").is_none());

        ctx.apply_history_response("room1", None, vec![]);
        assert!(ctx.begin_history_request("room1").is_some());
    }

    #[test]
    fn watermark_becomes_now_not_newest_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);
        ctx.store.set_watermark("room1", at(5)).unwrap();

        let before = Utc::now();
        ctx.begin_history_request("room1");
        let added = ctx.apply_history_response("room1", None, vec![payload("M9", 9)]);
        assert_eq!(added, 1);

        let watermark = ctx.store.watermark("room1").unwrap();
        assert!(watermark >= before, "watermark should be now, not t9");
        assert!(watermark > at(9));
    }

    #[test]
    fn empty_response_still_advances_watermark() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);

        ctx.begin_history_request("room1");
        let before = Utc::now();
        assert_eq!(ctx.apply_history_response("room1", None, vec![]), 0);
        assert!(ctx.store.watermark("room1").unwrap() >= before);
    }

    #[test]
    fn merge_skips_duplicates_and_tombstones() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);

        // M1 deleted locally, M2 already applied live.
        ctx.apply_incoming(Message {
            id: "M2".into(),
            session_id: "room1".into(),
            from: "alice".into(),
            content: "live".into(),
            time: at(2),
            is_system: false,
            kind: MessageKind::Text,
            is_nsfw: false,
            opaque_iv: None,
            conversation_id: None,
        });
        ctx.delete_message("room1", "M1");

        ctx.begin_history_request("room1");
        let added = ctx.apply_history_response(
            "room1",
            None,
            vec![payload("M1", 1), payload("M2", 2), payload("M3", 3)],
        );
        assert_eq!(added, 1);

        let ids: Vec<&str> = ctx
            .sessions
            .get("room1")
            .unwrap()
            .messages()
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(ids, vec!["M2", "M3"]);
    }

    #[test]
    fn delete_survives_reload_and_resync() {
        // Delete in one run; a later run (fresh ledger, same db) replays
        // history containing the deleted id and must not resurrect it.
        let dir = tempfile::tempdir().unwrap();
        {
            let mut ctx = context(&dir);
            ctx.apply_incoming(Message {
                id: "M1".into(),
                session_id: "room1".into(),
                from: "alice".into(),
                content: "doomed".into(),
                time: at(1),
                is_system: false,
                kind: MessageKind::Text,
                is_nsfw: false,
                opaque_iv: None,
                conversation_id: None,
            });
            ctx.delete_message("room1", "M1");
        }

        let mut ctx = context(&dir);
        ctx.load_local_cache("room1", 50);
        ctx.begin_history_request("room1");
        let added = ctx.apply_history_response("room1", None, vec![payload("M1", 1)]);
        assert_eq!(added, 0);
        assert!(ctx.sessions.get("room1").unwrap().messages().is_empty());
    }

    #[test]
    fn response_conversation_id_feeds_registry() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(&dir);

        ctx.begin_history_request("room1");
        ctx.apply_history_response("room1", Some("c-42".into()), vec![]);
        assert_eq!(ctx.registry.session_for("c-42"), Some("room1"));
    }
}
