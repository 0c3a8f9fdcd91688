use crate::Database;
use crate::models::{BannerRow, ChatRow, MessageRow, PetRow, UserRow, now_timestamp};
use anyhow::Result;
use khvostik_types::api::AdminStats;
use rusqlite::types::ToSql;
use rusqlite::{Connection, Row, params};

const USER_COLUMNS: &str = "id, email, name, password, role, created_at";

const PET_COLUMNS: &str = "id, kind, species, breed, name, description, color, location, \
    latitude, longitude, contact_name, contact_phone, reward, photo_url, status, user_id, \
    created_at, updated_at";

const CHAT_COLUMNS: &str = "id, pet_id, user_id, owner_id, status, created_at";

const BANNER_COLUMNS: &str = "id, title, image_url, link_url, position, active, created_at";

/// Listing search parameters. `None` means "don't filter on this".
#[derive(Debug, Clone, Default)]
pub struct PetFilter {
    pub kind: Option<String>,
    pub species: Option<String>,
    pub status: Option<String>,
    pub user_id: Option<String>,
    /// Case-insensitive substring over the listing's free-text fields.
    pub query: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl Database {
    // -- Users --

    /// Returns false when the email is already taken.
    pub fn create_user(&self, user: &UserRow) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "INSERT INTO users (id, email, name, password, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(email) DO NOTHING",
                params![user.id, user.email, user.name, user.password, user.role, user.created_at],
            )?;
            Ok(n > 0)
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1");
            conn.query_row(&sql, [email], user_from_row).optional()
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
            conn.query_row(&sql, [id], user_from_row).optional()
        })
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false if no such user exists.
    pub fn set_user_role(&self, id: &str, role: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("UPDATE users SET role = ?2 WHERE id = ?1", params![id, role])?;
            Ok(n > 0)
        })
    }

    /// Grants the admin role to the account with this email, if it exists.
    pub fn promote_admin(&self, email: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE users SET role = 'admin' WHERE email = ?1 AND role != 'admin'",
                [email],
            )?;
            Ok(n > 0)
        })
    }

    pub fn update_password(&self, id: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE users SET password = ?2 WHERE id = ?1",
                params![id, password_hash],
            )?;
            Ok(n > 0)
        })
    }

    /// Deletes the user together with their listings, chats and messages.
    pub fn delete_user(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    // -- Listings --

    pub fn insert_pet(&self, pet: &PetRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pets (id, kind, species, breed, name, description, color, location,
                                   latitude, longitude, contact_name, contact_phone, reward,
                                   photo_url, status, user_id, created_at, updated_at, search_text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                params![
                    pet.id,
                    pet.kind,
                    pet.species,
                    pet.breed,
                    pet.name,
                    pet.description,
                    pet.color,
                    pet.location,
                    pet.latitude,
                    pet.longitude,
                    pet.contact_name,
                    pet.contact_phone,
                    pet.reward,
                    pet.photo_url,
                    pet.status,
                    pet.user_id,
                    pet.created_at,
                    pet.updated_at,
                    search_text(pet),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_pet(&self, id: &str) -> Result<Option<PetRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {PET_COLUMNS} FROM pets WHERE id = ?1");
            conn.query_row(&sql, [id], pet_from_row).optional()
        })
    }

    pub fn list_pets(&self, filter: &PetFilter) -> Result<Vec<PetRow>> {
        self.with_conn(|conn| query_pets(conn, filter))
    }

    /// Writes every mutable column of `pet` back and bumps `updated_at`.
    /// Returns false if the row vanished in between.
    pub fn update_pet(&self, pet: &PetRow) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE pets SET kind = ?2, species = ?3, breed = ?4, name = ?5, description = ?6,
                                 color = ?7, location = ?8, latitude = ?9, longitude = ?10,
                                 contact_name = ?11, contact_phone = ?12, reward = ?13,
                                 photo_url = ?14, status = ?15, updated_at = ?16, search_text = ?17
                 WHERE id = ?1",
                params![
                    pet.id,
                    pet.kind,
                    pet.species,
                    pet.breed,
                    pet.name,
                    pet.description,
                    pet.color,
                    pet.location,
                    pet.latitude,
                    pet.longitude,
                    pet.contact_name,
                    pet.contact_phone,
                    pet.reward,
                    pet.photo_url,
                    pet.status,
                    now_timestamp(),
                    search_text(pet),
                ],
            )?;
            Ok(n > 0)
        })
    }

    pub fn set_pet_status(&self, id: &str, status: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE pets SET status = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, status, now_timestamp()],
            )?;
            Ok(n > 0)
        })
    }

    pub fn set_pet_photo(&self, id: &str, photo_url: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE pets SET photo_url = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, photo_url, now_timestamp()],
            )?;
            Ok(n > 0)
        })
    }

    /// Hard delete. Chats and messages go with it.
    pub fn delete_pet(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM pets WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    // -- Chats --

    /// Returns the chat for (pet, requester), creating it with `id` if there
    /// is none yet. The bool is true when a new row was inserted.
    pub fn get_or_create_chat(
        &self,
        id: &str,
        pet_id: &str,
        user_id: &str,
        owner_id: &str,
    ) -> Result<(ChatRow, bool)> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE pet_id = ?1 AND user_id = ?2");
            let existing = tx
                .query_row(&sql, params![pet_id, user_id], chat_from_row)
                .optional()?;

            if let Some(chat) = existing {
                return Ok((chat, false));
            }

            let chat = ChatRow {
                id: id.to_string(),
                pet_id: pet_id.to_string(),
                user_id: user_id.to_string(),
                owner_id: owner_id.to_string(),
                status: "active".to_string(),
                created_at: now_timestamp(),
            };
            tx.execute(
                "INSERT INTO chats (id, pet_id, user_id, owner_id, status, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![chat.id, chat.pet_id, chat.user_id, chat.owner_id, chat.status, chat.created_at],
            )?;
            tx.commit()?;

            Ok((chat, true))
        })
    }

    pub fn find_chat(&self, pet_id: &str, user_id: &str) -> Result<Option<ChatRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE pet_id = ?1 AND user_id = ?2");
            conn.query_row(&sql, params![pet_id, user_id], chat_from_row)
                .optional()
        })
    }

    pub fn get_chat(&self, id: &str) -> Result<Option<ChatRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1");
            conn.query_row(&sql, [id], chat_from_row).optional()
        })
    }

    /// Chats the user takes part in, either as requester or as listing owner.
    pub fn list_chats_for_user(&self, user_id: &str, status: Option<&str>) -> Result<Vec<ChatRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CHAT_COLUMNS} FROM chats
                 WHERE (user_id = ?1 OR owner_id = ?1) AND (?2 IS NULL OR status = ?2)
                 ORDER BY created_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![user_id, status], chat_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_chats(&self, status: Option<&str>) -> Result<Vec<ChatRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CHAT_COLUMNS} FROM chats WHERE (?1 IS NULL OR status = ?1) ORDER BY created_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![status], chat_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn set_chat_status(&self, id: &str, status: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("UPDATE chats SET status = ?2 WHERE id = ?1", params![id, status])?;
            Ok(n > 0)
        })
    }

    /// Of the given chat ids, keeps those the user may follow.
    pub fn filter_participating_chats(&self, user_id: &str, chat_ids: &[String]) -> Result<Vec<String>> {
        if chat_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (2..=chat_ids.len() + 1).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id FROM chats WHERE (user_id = ?1 OR owner_id = ?1) AND id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut params: Vec<&dyn ToSql> = Vec::with_capacity(chat_ids.len() + 1);
            params.push(&user_id);
            params.extend(chat_ids.iter().map(|id| id as &dyn ToSql));

            let ids = stmt
                .query_map(params.as_slice(), |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    // -- Messages --

    pub fn insert_message(&self, message: &MessageRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, chat_id, sender_id, body, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![message.id, message.chat_id, message.sender_id, message.body, message.created_at],
            )?;
            Ok(())
        })
    }

    pub fn message_exists(&self, chat_id: &str, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE id = ?1 AND chat_id = ?2",
                params![id, chat_id],
                |row| row.get(0),
            )?;
            Ok(n > 0)
        })
    }

    /// The newest `limit` messages sent before the message `before` (if
    /// given), returned oldest first. Messages sharing a timestamp are
    /// ordered by insertion, so the cursor never skips a tie.
    pub fn get_messages(&self, chat_id: &str, limit: u32, before: Option<&str>) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, chat_id, sender_id, body, created_at
                 FROM messages
                 WHERE chat_id = ?1
                   AND (?2 IS NULL OR (created_at, rowid) <
                        (SELECT created_at, rowid FROM messages WHERE id = ?2 AND chat_id = ?1))
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?3",
            )?;

            let mut rows = stmt
                .query_map(params![chat_id, before, limit], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        chat_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        body: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.reverse();
            Ok(rows)
        })
    }

    // -- Settings --

    pub fn get_settings(&self) -> Result<Vec<(String, String)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM app_settings ORDER BY key")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO app_settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, now_timestamp()],
            )?;
            Ok(())
        })
    }

    pub fn delete_setting(&self, key: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM app_settings WHERE key = ?1", [key])?;
            Ok(n > 0)
        })
    }

    // -- Banners --

    pub fn insert_banner(&self, banner: &BannerRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO banners (id, title, image_url, link_url, position, active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    banner.id,
                    banner.title,
                    banner.image_url,
                    banner.link_url,
                    banner.position,
                    banner.active,
                    banner.created_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_banner(&self, id: &str) -> Result<Option<BannerRow>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {BANNER_COLUMNS} FROM banners WHERE id = ?1");
            conn.query_row(&sql, [id], banner_from_row).optional()
        })
    }

    pub fn list_banners(&self, active_only: bool) -> Result<Vec<BannerRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {BANNER_COLUMNS} FROM banners WHERE (?1 = 0 OR active = 1) ORDER BY position, created_at"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([active_only], banner_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn update_banner(&self, banner: &BannerRow) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE banners SET title = ?2, image_url = ?3, link_url = ?4, position = ?5, active = ?6
                 WHERE id = ?1",
                params![
                    banner.id,
                    banner.title,
                    banner.image_url,
                    banner.link_url,
                    banner.position,
                    banner.active,
                ],
            )?;
            Ok(n > 0)
        })
    }

    pub fn delete_banner(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let n = conn.execute("DELETE FROM banners WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    // -- Password resets --

    pub fn insert_password_reset(&self, token: &str, user_id: &str, expires_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO password_resets (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
                params![token, user_id, expires_at],
            )?;
            Ok(())
        })
    }

    /// Marks an unused, unexpired token as used and returns its user id.
    pub fn consume_password_reset(&self, token: &str, now: &str) -> Result<Option<String>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let user_id: Option<String> = tx
                .query_row(
                    "SELECT user_id FROM password_resets WHERE token = ?1 AND used = 0 AND expires_at > ?2",
                    params![token, now],
                    |row| row.get(0),
                )
                .optional()?;

            if user_id.is_some() {
                tx.execute("UPDATE password_resets SET used = 1 WHERE token = ?1", [token])?;
            }
            tx.commit()?;

            Ok(user_id)
        })
    }

    /// Deletes used or expired reset tokens. Returns how many went.
    pub fn prune_password_resets(&self, now: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM password_resets WHERE used = 1 OR expires_at <= ?1",
                [now],
            )?;
            Ok(n)
        })
    }

    // -- Stats --

    pub fn stats(&self) -> Result<AdminStats> {
        self.with_conn(|conn| {
            let count = |sql: &str| -> Result<i64> { Ok(conn.query_row(sql, [], |r| r.get(0))?) };
            Ok(AdminStats {
                users: count("SELECT COUNT(*) FROM users")?,
                active_pets: count("SELECT COUNT(*) FROM pets WHERE status = 'active'")?,
                archived_pets: count("SELECT COUNT(*) FROM pets WHERE status = 'archived'")?,
                chats: count("SELECT COUNT(*) FROM chats")?,
                messages: count("SELECT COUNT(*) FROM messages")?,
            })
        })
    }
}

fn query_pets(conn: &Connection, filter: &PetFilter) -> Result<Vec<PetRow>> {
    let mut clauses: Vec<String> = Vec::new();
    let mut params: Vec<Box<dyn ToSql>> = Vec::new();

    let mut push = |clause: &str, value: Box<dyn ToSql>| {
        params.push(value);
        clauses.push(clause.replace('?', &format!("?{}", params.len())));
    };

    if let Some(kind) = &filter.kind {
        push("kind = ?", Box::new(kind.clone()));
    }
    if let Some(species) = &filter.species {
        push("species = ? COLLATE NOCASE", Box::new(species.clone()));
    }
    if let Some(status) = &filter.status {
        push("status = ?", Box::new(status.clone()));
    }
    if let Some(user_id) = &filter.user_id {
        push("user_id = ?", Box::new(user_id.clone()));
    }
    if let Some(query) = &filter.query {
        push(
            "search_text LIKE ? ESCAPE '\\'",
            Box::new(format!("%{}%", escape_like(&fold_case(query)))),
        );
    }

    let where_clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    let sql = format!(
        "SELECT {PET_COLUMNS} FROM pets {where_clause} ORDER BY created_at DESC LIMIT {} OFFSET {}",
        filter.limit, filter.offset
    );

    let mut stmt = conn.prepare(&sql)?;
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
    let rows = stmt
        .query_map(param_refs.as_slice(), pet_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// SQLite's lower() and LIKE only fold ASCII, so listings carry a
/// pre-folded copy of their searchable text.
fn search_text(pet: &PetRow) -> String {
    let parts = [
        pet.name.as_deref(),
        pet.breed.as_deref(),
        pet.color.as_deref(),
        pet.description.as_deref(),
        Some(pet.species.as_str()),
        Some(pet.location.as_str()),
    ];
    let joined: Vec<&str> = parts.into_iter().flatten().collect();
    fold_case(&joined.join(" "))
}

fn fold_case(s: &str) -> String {
    s.to_lowercase().replace('ё', "е")
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        password: row.get(3)?,
        role: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn pet_from_row(row: &Row<'_>) -> rusqlite::Result<PetRow> {
    Ok(PetRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        species: row.get(2)?,
        breed: row.get(3)?,
        name: row.get(4)?,
        description: row.get(5)?,
        color: row.get(6)?,
        location: row.get(7)?,
        latitude: row.get(8)?,
        longitude: row.get(9)?,
        contact_name: row.get(10)?,
        contact_phone: row.get(11)?,
        reward: row.get(12)?,
        photo_url: row.get(13)?,
        status: row.get(14)?,
        user_id: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        pet_id: row.get(1)?,
        user_id: row.get(2)?,
        owner_id: row.get(3)?,
        status: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn banner_from_row(row: &Row<'_>) -> rusqlite::Result<BannerRow> {
    Ok(BannerRow {
        id: row.get(0)?,
        title: row.get(1)?,
        image_url: row.get(2)?,
        link_url: row.get(3)?,
        position: row.get(4)?,
        active: row.get(5)?,
        created_at: row.get(6)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::format_timestamp;
    use chrono::{Duration, Utc};

    fn user(db: &Database, email: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        db.create_user(&UserRow {
            id: id.clone(),
            email: email.to_string(),
            name: "Тест".to_string(),
            password: "hash".to_string(),
            role: "user".to_string(),
            created_at: now_timestamp(),
        })
        .unwrap();
        id
    }

    fn pet(db: &Database, owner: &str, location: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        db.insert_pet(&PetRow {
            id: id.clone(),
            kind: "lost".to_string(),
            species: "кошка".to_string(),
            breed: None,
            name: Some("Мурка".to_string()),
            description: Some("Рыжая, Ёжится от шума".to_string()),
            color: None,
            location: location.to_string(),
            latitude: None,
            longitude: None,
            contact_name: "Анна".to_string(),
            contact_phone: "+7 900 000-00-00".to_string(),
            reward: None,
            photo_url: None,
            status: "active".to_string(),
            user_id: owner.to_string(),
            created_at: now_timestamp(),
            updated_at: now_timestamp(),
        })
        .unwrap();
        id
    }

    fn message(db: &Database, chat_id: &str, sender: &str, body: &str, at: &str) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        db.insert_message(&MessageRow {
            id: id.clone(),
            chat_id: chat_id.to_string(),
            sender_id: sender.to_string(),
            body: body.to_string(),
            created_at: at.to_string(),
        })
        .unwrap();
        id
    }

    fn bodies(rows: Vec<MessageRow>) -> Vec<String> {
        rows.into_iter().map(|m| m.body).collect()
    }

    #[test]
    fn chat_is_created_once_per_pet_and_requester() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner@example.com");
        let requester = user(&db, "finder@example.com");
        let pet_id = pet(&db, &owner, "Анапа");

        let (first, created) = db.get_or_create_chat("c1", &pet_id, &requester, &owner).unwrap();
        assert!(created);
        let (second, created) = db.get_or_create_chat("c2", &pet_id, &requester, &owner).unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(db.list_chats_for_user(&owner, None).unwrap().len(), 1);
        assert_eq!(db.list_chats_for_user(&requester, Some("archived")).unwrap().len(), 0);
    }

    #[test]
    fn messages_come_back_oldest_first_with_cursor() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner@example.com");
        let requester = user(&db, "finder@example.com");
        let pet_id = pet(&db, &owner, "Анапа");
        let (chat, _) = db.get_or_create_chat("c1", &pet_id, &requester, &owner).unwrap();

        let base = Utc::now();
        let ids: Vec<String> = (0..5)
            .map(|i| {
                let at = format_timestamp(base + Duration::seconds(i));
                message(&db, &chat.id, &requester, &format!("m{i}"), &at)
            })
            .collect();

        let latest = bodies(db.get_messages(&chat.id, 2, None).unwrap());
        assert_eq!(latest, vec!["m3", "m4"]);

        let older = bodies(db.get_messages(&chat.id, 10, Some(&ids[3])).unwrap());
        assert_eq!(older, vec!["m0", "m1", "m2"]);

        assert!(db.message_exists(&chat.id, &ids[0]).unwrap());
        assert!(!db.message_exists("c2", &ids[0]).unwrap());
    }

    #[test]
    fn paging_keeps_messages_sent_in_the_same_millisecond() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner@example.com");
        let requester = user(&db, "finder@example.com");
        let pet_id = pet(&db, &owner, "Анапа");
        let (chat, _) = db.get_or_create_chat("c1", &pet_id, &requester, &owner).unwrap();

        let at = now_timestamp();
        for i in 0..4 {
            message(&db, &chat.id, &requester, &format!("m{i}"), &at);
        }

        let first = db.get_messages(&chat.id, 2, None).unwrap();
        let cursor = first[0].id.clone();
        assert_eq!(bodies(first), vec!["m2", "m3"]);

        let rest = bodies(db.get_messages(&chat.id, 10, Some(&cursor)).unwrap());
        assert_eq!(rest, vec!["m0", "m1"]);
    }

    #[test]
    fn duplicate_email_is_not_inserted() {
        let db = Database::open_in_memory().unwrap();
        user(&db, "owner@example.com");

        let inserted = db
            .create_user(&UserRow {
                id: uuid::Uuid::new_v4().to_string(),
                email: "owner@example.com".to_string(),
                name: "Другой".to_string(),
                password: "hash".to_string(),
                role: "user".to_string(),
                created_at: now_timestamp(),
            })
            .unwrap();
        assert!(!inserted);
        assert_eq!(db.list_users().unwrap().len(), 1);
    }

    #[test]
    fn search_folds_cyrillic_case() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner@example.com");
        pet(&db, &owner, "станица Гостагаевская");
        pet(&db, &owner, "Анапа");

        let filter = PetFilter {
            query: Some("ГОСТАГАЕВСКАЯ".to_string()),
            limit: 50,
            ..Default::default()
        };
        assert_eq!(db.list_pets(&filter).unwrap().len(), 1);

        let filter = PetFilter {
            query: Some("ежится".to_string()),
            limit: 50,
            ..Default::default()
        };
        assert_eq!(db.list_pets(&filter).unwrap().len(), 2);

        let filter = PetFilter {
            query: Some("100%".to_string()),
            limit: 50,
            ..Default::default()
        };
        assert!(db.list_pets(&filter).unwrap().is_empty());
    }

    #[test]
    fn deleting_a_pet_cascades_to_chats_and_messages() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner@example.com");
        let requester = user(&db, "finder@example.com");
        let pet_id = pet(&db, &owner, "Анапа");
        let (chat, _) = db.get_or_create_chat("c1", &pet_id, &requester, &owner).unwrap();
        message(&db, &chat.id, &requester, "привет", &now_timestamp());

        assert!(db.delete_pet(&pet_id).unwrap());
        assert!(db.get_chat(&chat.id).unwrap().is_none());
        assert_eq!(db.stats().unwrap().messages, 0);
    }

    #[test]
    fn out_of_range_coordinates_are_rejected_by_the_schema() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner@example.com");
        let id = pet(&db, &owner, "Анапа");
        let mut row = db.get_pet(&id).unwrap().unwrap();
        row.latitude = Some(91.0);
        row.longitude = Some(37.0);
        assert!(db.update_pet(&row).is_err());
    }

    #[test]
    fn reset_tokens_are_single_use_and_expire() {
        let db = Database::open_in_memory().unwrap();
        let id = user(&db, "owner@example.com");
        let now = Utc::now();
        db.insert_password_reset("live", &id, &format_timestamp(now + Duration::hours(1)))
            .unwrap();
        db.insert_password_reset("stale", &id, &format_timestamp(now - Duration::hours(1)))
            .unwrap();

        let now = format_timestamp(now);
        assert_eq!(db.consume_password_reset("live", &now).unwrap(), Some(id));
        assert_eq!(db.consume_password_reset("live", &now).unwrap(), None);
        assert_eq!(db.consume_password_reset("stale", &now).unwrap(), None);
        assert_eq!(db.prune_password_resets(&now).unwrap(), 2);
    }

    #[test]
    fn participation_filter_drops_foreign_chats() {
        let db = Database::open_in_memory().unwrap();
        let owner = user(&db, "owner@example.com");
        let requester = user(&db, "finder@example.com");
        let stranger = user(&db, "stranger@example.com");
        let pet_id = pet(&db, &owner, "Анапа");
        let (chat, _) = db.get_or_create_chat("c1", &pet_id, &requester, &owner).unwrap();

        let ids = vec![chat.id.clone(), "missing".to_string()];
        assert_eq!(db.filter_participating_chats(&requester, &ids).unwrap(), vec![chat.id.clone()]);
        assert!(db.filter_participating_chats(&stranger, &ids).unwrap().is_empty());
    }

    #[test]
    fn admin_promotion_by_email() {
        let db = Database::open_in_memory().unwrap();
        let id = user(&db, "admin@example.com");
        assert!(db.promote_admin("admin@example.com").unwrap());
        assert!(!db.promote_admin("admin@example.com").unwrap());
        assert_eq!(db.get_user_by_id(&id).unwrap().unwrap().role, "admin");
    }
}
