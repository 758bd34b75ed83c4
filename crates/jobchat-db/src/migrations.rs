use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            first_name  TEXT NOT NULL DEFAULT '',
            last_name   TEXT NOT NULL DEFAULT '',
            avatar_url  TEXT,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS messages (
            id          TEXT PRIMARY KEY,
            sender_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            receiver_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content     TEXT NOT NULL,
            client_ref  TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT,
            read        INTEGER NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS idx_messages_pair
            ON messages(sender_id, receiver_id, created_at);

        CREATE INDEX IF NOT EXISTS idx_messages_receiver
            ON messages(receiver_id, created_at);

        -- One stored message per resent client_ref
        CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_client_ref
            ON messages(sender_id, client_ref)
            WHERE client_ref IS NOT NULL;
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
