use rusqlite::Connection;

use crate::error::Result;

/// Initialise the `calls` table in `conn`.
///
/// Safe to call on every startup. `AUTOINCREMENT` keeps SQLite from handing
/// out the id of a deleted row again, so a stale timer can never be mistaken
/// for a newer call.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS calls (
            id              INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
            countdown_secs  INTEGER NOT NULL,
            created_at      TEXT    NOT NULL,
            scheduled_at    TEXT    NOT NULL,   -- fixed-width RFC 3339 UTC
            is_active       INTEGER NOT NULL DEFAULT 1,
            payload         TEXT    NOT NULL,   -- JSON-encoded CallPayload
            updated_at      TEXT    NOT NULL
        ) STRICT;

        -- Recovery: SELECT … WHERE is_active = 1 AND scheduled_at > ?
        CREATE INDEX IF NOT EXISTS idx_calls_active_scheduled
            ON calls (is_active, scheduled_at);
        ",
    )?;
    Ok(())
}
