use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          TEXT PRIMARY KEY,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS characters (
            id              TEXT PRIMARY KEY,
            name            TEXT NOT NULL,
            description     TEXT NOT NULL,
            image           TEXT NOT NULL,
            base_prompt     TEXT NOT NULL DEFAULT '',
            greeting_text   TEXT NOT NULL DEFAULT '',
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );

        -- role is NULL on rows written before roles were tracked
        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY,
            character_id    TEXT NOT NULL REFERENCES characters(id) ON DELETE CASCADE,
            user_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content         TEXT NOT NULL,
            role            TEXT CHECK (role IN ('user', 'model')),
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(character_id, user_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
