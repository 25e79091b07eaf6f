use rusqlite::{Connection, Result};

/// Initialise conversation tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_conversations_table(conn)?;
    create_messages_table(conn)?;
    Ok(())
}

fn create_conversations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            uuid        TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL,
            title       TEXT NOT NULL DEFAULT 'New',
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_user
            ON conversations(user_id, updated_at DESC);",
    )
}

fn create_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            sequence        INTEGER NOT NULL,
            role            TEXT NOT NULL,
            content_type    TEXT NOT NULL DEFAULT 'text',
            content         TEXT NOT NULL,
            meta            TEXT,
            is_summary      INTEGER NOT NULL DEFAULT 0,
            created_at      INTEGER NOT NULL,
            UNIQUE(conversation_id, sequence)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conv_seq
            ON messages(conversation_id, sequence);",
    )
}
