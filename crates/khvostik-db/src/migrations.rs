use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                email       TEXT NOT NULL UNIQUE,
                name        TEXT NOT NULL,
                password    TEXT NOT NULL,
                role        TEXT NOT NULL DEFAULT 'user',
                created_at  TEXT NOT NULL
            );

            CREATE TABLE pets (
                id              TEXT PRIMARY KEY,
                kind            TEXT NOT NULL,
                species         TEXT NOT NULL,
                breed           TEXT,
                name            TEXT,
                description     TEXT,
                color           TEXT,
                location        TEXT NOT NULL,
                latitude        REAL CHECK (latitude IS NULL OR latitude BETWEEN -90 AND 90),
                longitude       REAL CHECK (longitude IS NULL OR longitude BETWEEN -180 AND 180),
                contact_name    TEXT NOT NULL,
                contact_phone   TEXT NOT NULL,
                reward          INTEGER,
                photo_url       TEXT,
                status          TEXT NOT NULL DEFAULT 'active',
                search_text     TEXT NOT NULL DEFAULT '',
                user_id         TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );

            CREATE INDEX idx_pets_status ON pets(status, created_at);
            CREATE INDEX idx_pets_user ON pets(user_id);

            CREATE TABLE chats (
                id          TEXT PRIMARY KEY,
                pet_id      TEXT NOT NULL REFERENCES pets(id) ON DELETE CASCADE,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                owner_id    TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                status      TEXT NOT NULL DEFAULT 'active',
                created_at  TEXT NOT NULL,
                UNIQUE(pet_id, user_id)
            );

            CREATE INDEX idx_chats_owner ON chats(owner_id);

            CREATE TABLE messages (
                id          TEXT PRIMARY KEY,
                chat_id     TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
                sender_id   TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                body        TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_messages_chat ON messages(chat_id, created_at);

            CREATE TABLE app_settings (
                key         TEXT PRIMARY KEY,
                value       TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );

            CREATE TABLE banners (
                id          TEXT PRIMARY KEY,
                title       TEXT NOT NULL,
                image_url   TEXT NOT NULL,
                link_url    TEXT,
                position    INTEGER NOT NULL DEFAULT 0,
                active      INTEGER NOT NULL DEFAULT 1,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE password_resets (
                token       TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                expires_at  TEXT NOT NULL,
                used        INTEGER NOT NULL DEFAULT 0
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
