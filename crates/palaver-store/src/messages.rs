use chrono::{DateTime, Utc};
use rusqlite::params;

use palaver_shared::types::{Message, MessageKind};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Insert a message, or do nothing if a row with the same id exists.
    ///
    /// The upsert is what makes concurrent sibling windows converge: both may
    /// persist the same server message within milliseconds and the second
    /// write is a no-op.
    pub fn upsert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages
                 (id, session_id, sender, content, time, kind,
                  is_system, is_nsfw, opaque_iv, conversation_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO NOTHING",
            params![
                message.id,
                message.session_id,
                message.from,
                message.content,
                message.time.to_rfc3339(),
                kind_str(message.kind),
                message.is_system as i32,
                message.is_nsfw as i32,
                message.opaque_iv,
                message.conversation_id,
            ],
        )?;
        Ok(())
    }

    /// The most recent `limit` messages of a session, ascending by time.
    pub fn recent_messages(&self, session_id: &str, limit: u32) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, session_id, sender, content, time, kind,
                    is_system, is_nsfw, opaque_iv, conversation_id
             FROM messages
             WHERE session_id = ?1
             ORDER BY time DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![session_id, limit], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        // Fetched newest-first for the LIMIT; callers want ascending order.
        messages.reverse();
        Ok(messages)
    }

    /// Timestamp of the newest stored message for a session, if any.
    pub fn latest_timestamp(&self, session_id: &str) -> Result<Option<DateTime<Utc>>> {
        let ts: Option<String> = self.conn().query_row(
            "SELECT MAX(time) FROM messages WHERE session_id = ?1",
            params![session_id],
            |row| row.get(0),
        )?;

        match ts {
            Some(s) => {
                let parsed = DateTime::parse_from_rfc3339(&s)?.with_timezone(&Utc);
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    /// Delete one message by id. Returns whether a row was removed.
    pub fn delete_message(&self, id: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }

    /// Record a durable tombstone for a user-deleted message id.
    pub fn record_deleted(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO deleted_messages (id, deleted_at) VALUES (?1, ?2)
             ON CONFLICT(id) DO NOTHING",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// All durable tombstones, used to seed the dedup ledger at startup.
    pub fn deleted_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT id FROM deleted_messages ORDER BY deleted_at")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }
}

fn kind_str(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Text => "text",
        MessageKind::Image => "image",
        MessageKind::File => "file",
        MessageKind::Private => "private",
        MessageKind::System => "system",
    }
}

fn kind_from_str(s: &str) -> MessageKind {
    match s {
        "image" => MessageKind::Image,
        "file" => MessageKind::File,
        "private" => MessageKind::Private,
        "system" => MessageKind::System,
        _ => MessageKind::Text,
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let ts_str: String = row.get(4)?;
    let kind: String = row.get(5)?;

    let time: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        from: row.get(2)?,
        content: row.get(3)?,
        time,
        kind: kind_from_str(&kind),
        is_system: row.get::<_, i32>(6)? != 0,
        is_nsfw: row.get::<_, i32>(7)? != 0,
        opaque_iv: row.get(8)?,
        conversation_id: row.get(9)?,
    })
}
