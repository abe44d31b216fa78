use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `reminders` table (idempotent) and an index matching the
/// due-set query so polling stays cheap with many pending reminders.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS reminders (
            id                TEXT    NOT NULL PRIMARY KEY,
            owner             TEXT    NOT NULL,
            subject           TEXT    NOT NULL,
            time_spec         TEXT    NOT NULL,   -- JSON-encoded TimeSpec enum
            next_fire_at_ms   INTEGER NOT NULL,   -- unix millis, UTC
            occurrence_at_ms  INTEGER NOT NULL,
            status            TEXT    NOT NULL DEFAULT 'pending',
            attempts          INTEGER NOT NULL DEFAULT 0,
            fired_count       INTEGER NOT NULL DEFAULT 0,
            last_error        TEXT,
            priority          TEXT    NOT NULL DEFAULT 'medium',
            tags              TEXT    NOT NULL DEFAULT '[]', -- JSON array
            created_at        TEXT    NOT NULL,
            updated_at        TEXT    NOT NULL,
            claimed_at_ms     INTEGER             -- set while Firing
        ) STRICT;

        -- Due set: WHERE status = 'pending' AND next_fire_at_ms <= ? ORDER BY next_fire_at_ms, id
        CREATE INDEX IF NOT EXISTS idx_reminders_due
            ON reminders (status, next_fire_at_ms, id);
        CREATE INDEX IF NOT EXISTS idx_reminders_owner
            ON reminders (owner, created_at);
        ",
    )?;
    Ok(())
}
