use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              TEXT PRIMARY KEY,
            email           TEXT NOT NULL UNIQUE,
            display_name    TEXT NOT NULL,
            password        TEXT NOT NULL,
            bio             TEXT,
            created_at      TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            token       TEXT PRIMARY KEY,
            user_id     TEXT NOT NULL REFERENCES users(id),
            expires_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_user
            ON sessions(user_id);

        -- At most one request per ordered (sender, receiver) pair, in any
        -- status. A rejected request permanently blocks a resend.
        CREATE TABLE IF NOT EXISTS friend_requests (
            id          TEXT PRIMARY KEY,
            sender_id   TEXT NOT NULL REFERENCES users(id),
            receiver_id TEXT NOT NULL REFERENCES users(id),
            status      TEXT NOT NULL DEFAULT 'pending',
            created_at  TEXT NOT NULL,
            UNIQUE(sender_id, receiver_id)
        );

        CREATE INDEX IF NOT EXISTS idx_friend_requests_receiver
            ON friend_requests(receiver_id, status);

        -- Symmetric friend relation: accepting a request inserts both
        -- directions. The primary key makes re-insertion a no-op.
        CREATE TABLE IF NOT EXISTS friends (
            user_id     TEXT NOT NULL REFERENCES users(id),
            friend_id   TEXT NOT NULL REFERENCES users(id),
            PRIMARY KEY (user_id, friend_id)
        );

        CREATE TABLE IF NOT EXISTS private_messages (
            id          TEXT PRIMARY KEY,
            sender_id   TEXT NOT NULL REFERENCES users(id),
            receiver_id TEXT NOT NULL REFERENCES users(id),
            text        TEXT NOT NULL DEFAULT '',
            image_ref   TEXT,
            read        INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_private_messages_pair
            ON private_messages(sender_id, receiver_id, created_at);

        CREATE TABLE IF NOT EXISTS global_messages (
            id          TEXT PRIMARY KEY,
            sender_id   TEXT NOT NULL REFERENCES users(id),
            text        TEXT NOT NULL DEFAULT '',
            image_ref   TEXT,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_global_messages_created
            ON global_messages(created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
