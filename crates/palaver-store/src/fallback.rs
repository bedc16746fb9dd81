//! Degraded fallback persistence.
//!
//! A single flat JSON blob holding every session's messages, watermarks, and
//! deletion tombstones. Non-transactional and capped at
//! [`FALLBACK_SESSION_CAP`] messages per session with oldest-trimmed-first
//! eviction. Used for the remainder of the process once the primary backend
//! has failed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use palaver_shared::constants::FALLBACK_SESSION_CAP;
use palaver_shared::types::Message;

use crate::error::Result;

/// On-disk shape of the fallback blob.
#[derive(Debug, Default, Serialize, Deserialize)]
struct FallbackBlob {
    /// Per-session message logs, kept ascending by time.
    sessions: HashMap<String, Vec<Message>>,
    /// Per-session sync watermarks.
    watermarks: HashMap<String, DateTime<Utc>>,
    /// Tombstones of user-deleted message ids.
    deleted: Vec<String>,
}

/// Flat keyed-blob store; every mutation rewrites the whole file.
pub struct FallbackStore {
    path: PathBuf,
    blob: FallbackBlob,
}

impl FallbackStore {
    /// Open (or create) the fallback blob at the given path.
    ///
    /// An unreadable or corrupt blob is discarded and replaced with an empty
    /// one: the fallback tier may lose data, never crash.
    pub fn open_at(path: &Path) -> Self {
        let blob = std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_else(|| {
                tracing::debug!(path = %path.display(), "starting with empty fallback blob");
                FallbackBlob::default()
            });

        Self {
            path: path.to_path_buf(),
            blob,
        }
    }

    /// Insert a message into a session's capped log. Idempotent under the
    /// standard dedup rule.
    pub fn save(&mut self, message: &Message) -> Result<()> {
        let log = self
            .blob
            .sessions
            .entry(message.session_id.clone())
            .or_default();

        if log.iter().any(|m| m.dedup_matches(message)) {
            return Ok(());
        }

        let at = log.partition_point(|m| m.time <= message.time);
        log.insert(at, message.clone());

        if log.len() > FALLBACK_SESSION_CAP {
            let excess = log.len() - FALLBACK_SESSION_CAP;
            log.drain(..excess);
        }

        self.persist()
    }

    /// The most recent `limit` messages of a session, ascending by time.
    pub fn recent_messages(&self, session_id: &str, limit: u32) -> Vec<Message> {
        let log = match self.blob.sessions.get(session_id) {
            Some(log) => log,
            None => return Vec::new(),
        };
        let skip = log.len().saturating_sub(limit as usize);
        log[skip..].to_vec()
    }

    /// Timestamp of the newest message held for a session, if any.
    pub fn latest_timestamp(&self, session_id: &str) -> Option<DateTime<Utc>> {
        self.blob
            .sessions
            .get(session_id)?
            .last()
            .map(|m| m.time)
    }

    /// Remove one message and record its tombstone.
    pub fn delete_one(&mut self, session_id: &str, id: &str) -> Result<()> {
        if let Some(log) = self.blob.sessions.get_mut(session_id) {
            log.retain(|m| m.id != id);
        }
        if !self.blob.deleted.iter().any(|d| d == id) {
            self.blob.deleted.push(id.to_string());
        }
        self.persist()
    }

    /// All deletion tombstones.
    pub fn deleted_ids(&self) -> Vec<String> {
        self.blob.deleted.clone()
    }

    pub fn watermark(&self, session_id: &str) -> Option<DateTime<Utc>> {
        self.blob.watermarks.get(session_id).copied()
    }

    pub fn set_watermark(&mut self, session_id: &str, timestamp: DateTime<Utc>) -> Result<()> {
        self.blob
            .watermarks
            .insert(session_id.to_string(), timestamp);
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let text = serde_json::to_string(&self.blob)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn save_is_idempotent_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FallbackStore::open_at(&dir.path().join("fb.json"));

        store.save(&msg("b", 2)).unwrap();
        store.save(&msg("a", 1)).unwrap();
        store.save(&msg("b", 2)).unwrap();

        let got = store.recent_messages("room1", 10);
        let ids: Vec<&str> = got.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn session_log_capped_oldest_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FallbackStore::open_at(&dir.path().join("fb.json"));

        for i in 0..(FALLBACK_SESSION_CAP as i64 + 10) {
            store.save(&msg(&format!("m{i}"), i)).unwrap();
        }

        let got = store.recent_messages("room1", 10_000);
        assert_eq!(got.len(), FALLBACK_SESSION_CAP);
        // The oldest ten were trimmed.
        assert_eq!(got[0].id, "m10");
    }

    #[test]
    fn survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fb.json");

        {
            let mut store = FallbackStore::open_at(&path);
            store.save(&msg("m1", 0)).unwrap();
            store.delete_one("room1", "m1").unwrap();
            store
                .set_watermark("room1", DateTime::from_timestamp(1_760_000_500, 0).unwrap())
                .unwrap();
        }

        let store = FallbackStore::open_at(&path);
        assert!(store.recent_messages("room1", 10).is_empty());
        assert_eq!(store.deleted_ids(), vec!["m1".to_string()]);
        assert!(store.watermark("room1").is_some());
    }

    #[test]
    fn corrupt_blob_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fb.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FallbackStore::open_at(&path);
        assert!(store.recent_messages("room1", 10).is_empty());
    }
}
