//! v001 -- Initial schema creation.
//!
//! Creates the three core tables: `messages`, `watermarks`, and
//! `deleted_messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Messages: one row per message, keyed by the globally unique id.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,
    session_id      TEXT NOT NULL,
    sender          TEXT NOT NULL,
    content         TEXT NOT NULL,
    time            TEXT NOT NULL,               -- ISO-8601 / RFC-3339
    kind            TEXT NOT NULL,               -- text/image/file/private/system
    is_system       INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    is_nsfw         INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1
    opaque_iv       TEXT,                        -- detached cipher nonce, base64
    conversation_id TEXT                         -- server-issued, nullable
);

CREATE INDEX IF NOT EXISTS idx_messages_session_time
    ON messages(session_id, time);
CREATE INDEX IF NOT EXISTS idx_messages_sender       ON messages(sender);
CREATE INDEX IF NOT EXISTS idx_messages_kind         ON messages(kind);
CREATE INDEX IF NOT EXISTS idx_messages_nsfw         ON messages(is_nsfw);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);

-- ----------------------------------------------------------------
-- Watermarks: per-session timestamp up to which history is synced.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS watermarks (
    session_id TEXT PRIMARY KEY NOT NULL,
    timestamp  TEXT NOT NULL                     -- ISO-8601
);

-- ----------------------------------------------------------------
-- Deleted messages: durable tombstones so a history merge cannot
-- resurrect a user-deleted message.
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS deleted_messages (
    id         TEXT PRIMARY KEY NOT NULL,
    deleted_at TEXT NOT NULL
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
