//! v001 -- Initial schema creation.
//!
//! Creates the two core tables: `users` (public profiles) and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users (public profile only; credentials live in the auth service)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY NOT NULL,    -- identity issued by the auth service
    full_name   TEXT NOT NULL,
    bio         TEXT NOT NULL DEFAULT '',
    profile_pic TEXT,                         -- URL in the external media store
    created_at  TEXT NOT NULL,                -- RFC-3339, fixed width (micros)
    updated_at  TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id          TEXT PRIMARY KEY NOT NULL,    -- UUID v4
    sender_id   TEXT NOT NULL,
    receiver_id TEXT NOT NULL,
    text        TEXT,
    image       TEXT,
    seen        INTEGER NOT NULL DEFAULT 0,   -- boolean 0/1, only ever 0 -> 1
    created_at  TEXT NOT NULL,

    CHECK (text IS NOT NULL OR image IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_messages_pair_ts
    ON messages(sender_id, receiver_id, created_at);

CREATE INDEX IF NOT EXISTS idx_messages_receiver_unseen
    ON messages(receiver_id, seen);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
