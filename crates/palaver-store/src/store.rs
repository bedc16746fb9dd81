//! The selected-once, two-tier store facade.
//!
//! [`LocalStore`] routes every operation to the SQLite primary until the
//! first primary error, then flips a sticky process flag and serves the
//! remainder of the run from the JSON fallback. There is no automatic
//! upgrade back; only a restart re-probes the primary.

use std::path::PathBuf;

use chrono::{DateTime, Utc};

use palaver_shared::types::Message;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::fallback::FallbackStore;

/// Which backend a fresh store should start on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    Primary,
    Fallback,
}

/// Pure startup selection: fall back when the primary probe failed or the
/// operator forced degraded mode. Separated from backend construction so the
/// decision is testable on its own.
pub fn choose_backend(primary_probe_ok: bool, force_fallback: bool) -> BackendChoice {
    if force_fallback || !primary_probe_ok {
        BackendChoice::Fallback
    } else {
        BackendChoice::Primary
    }
}

/// Paths and switches for opening a [`LocalStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Fallback JSON blob file.
    pub fallback_path: PathBuf,
    /// Skip the primary entirely (operator override, mainly for debugging).
    pub force_fallback: bool,
}

/// Two-tier local store with sticky fallback downgrade.
pub struct LocalStore {
    primary: Option<Database>,
    fallback: FallbackStore,
    degraded: bool,
}

impl LocalStore {
    /// Open the store, probing the primary backend once.
    pub fn open(config: &StoreConfig) -> Self {
        let fallback = FallbackStore::open_at(&config.fallback_path);

        let probed = if config.force_fallback {
            None
        } else {
            match Database::open_at(&config.db_path) {
                Ok(db) => Some(db),
                Err(e) => {
                    tracing::warn!(error = %e, "primary store failed to open");
                    None
                }
            }
        };

        let choice = choose_backend(probed.is_some(), config.force_fallback);
        if choice == BackendChoice::Fallback {
            tracing::warn!("local store starting in fallback mode");
        }

        Self {
            degraded: choice == BackendChoice::Fallback,
            primary: probed,
            fallback,
        }
    }

    /// Whether the store has downgraded to the fallback tier.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Direct access to the primary database, when still healthy.
    pub fn primary(&self) -> Option<&Database> {
        if self.degraded {
            None
        } else {
            self.primary.as_ref()
        }
    }

    fn downgrade(&mut self, op: &str, err: &StoreError) {
        tracing::warn!(op, error = %err, "primary store failed; sticky fallback engaged");
        self.degraded = true;
    }

    /// Persist a message (id-keyed upsert on the primary).
    pub fn save(&mut self, message: &Message) -> Result<()> {
        if !self.degraded {
            if let Some(db) = &self.primary {
                match db.upsert_message(message) {
                    Ok(()) => return Ok(()),
                    Err(e) => self.downgrade("save", &e),
                }
            }
        }
        self.fallback.save(message)
    }

    /// The most recent `limit` messages of a session, ascending by time.
    pub fn load_recent(&mut self, session_id: &str, limit: u32) -> Vec<Message> {
        if !self.degraded {
            if let Some(db) = &self.primary {
                match db.recent_messages(session_id, limit) {
                    Ok(messages) => return messages,
                    Err(e) => self.downgrade("load_recent", &e),
                }
            }
        }
        self.fallback.recent_messages(session_id, limit)
    }

    /// Timestamp of the newest stored message for a session, if any.
    pub fn latest_timestamp(&mut self, session_id: &str) -> Option<DateTime<Utc>> {
        if !self.degraded {
            if let Some(db) = &self.primary {
                match db.latest_timestamp(session_id) {
                    Ok(ts) => return ts,
                    Err(e) => self.downgrade("latest_timestamp", &e),
                }
            }
        }
        self.fallback.latest_timestamp(session_id)
    }

    /// Remove one message and record its durable tombstone.
    pub fn delete_one(&mut self, session_id: &str, id: &str) -> Result<()> {
        if !self.degraded {
            if let Some(db) = &self.primary {
                let outcome = db
                    .delete_message(id)
                    .and_then(|_| db.record_deleted(id));
                match outcome {
                    Ok(()) => return Ok(()),
                    Err(e) => self.downgrade("delete_one", &e),
                }
            }
        }
        self.fallback.delete_one(session_id, id)
    }

    /// All durable deletion tombstones.
    pub fn deleted_ids(&mut self) -> Vec<String> {
        if !self.degraded {
            if let Some(db) = &self.primary {
                match db.deleted_ids() {
                    Ok(ids) => return ids,
                    Err(e) => self.downgrade("deleted_ids", &e),
                }
            }
        }
        self.fallback.deleted_ids()
    }

    /// The stored sync watermark for a session, if any.
    pub fn watermark(&mut self, session_id: &str) -> Option<DateTime<Utc>> {
        if !self.degraded {
            if let Some(db) = &self.primary {
                match db.watermark(session_id) {
                    Ok(ts) => return ts,
                    Err(e) => self.downgrade("watermark", &e),
                }
            }
        }
        self.fallback.watermark(session_id)
    }

    /// Overwrite the sync watermark for a session.
    pub fn set_watermark(&mut self, session_id: &str, timestamp: DateTime<Utc>) -> Result<()> {
        if !self.degraded {
            if let Some(db) = &self.primary {
                match db.set_watermark(session_id, timestamp) {
                    Ok(()) => return Ok(()),
                    Err(e) => self.downgrade("set_watermark", &e),
                }
            }
        }
        self.fallback.set_watermark(session_id, timestamp)
    }
}
