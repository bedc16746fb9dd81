//! Per-session sync watermarks.
//!
//! A watermark records the timestamp up to which a session's history is
//! known to be fully synced, so history requests never re-fetch what the
//! store already holds.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// The stored watermark for a session, if one has been set.
    pub fn watermark(&self, session_id: &str) -> Result<Option<DateTime<Utc>>> {
        let row = self.conn().query_row(
            "SELECT timestamp FROM watermarks WHERE session_id = ?1",
            params![session_id],
            |row| row.get::<_, String>(0),
        );

        match row {
            Ok(s) => Ok(Some(DateTime::parse_from_rfc3339(&s)?.with_timezone(&Utc))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite the watermark for a session.
    pub fn set_watermark(&self, session_id: &str, timestamp: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO watermarks (session_id, timestamp) VALUES (?1, ?2)
             ON CONFLICT(session_id) DO UPDATE SET timestamp = excluded.timestamp",
            params![session_id, timestamp.to_rfc3339()],
        )?;
        Ok(())
    }
}
