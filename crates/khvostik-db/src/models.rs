//! Database row types. These map directly to SQLite rows and stay
//! string-typed; `into_*` converts them to the khvostik-types API models.

use chrono::{DateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use khvostik_types::models::{
    Banner, Chat, ChatStatus, Listing, Message, PetKind, PetStatus, Role, User,
};

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub name: String,
    pub password: String,
    pub role: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct PetRow {
    pub id: String,
    pub kind: String,
    pub species: String,
    pub breed: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub location: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub contact_name: String,
    pub contact_phone: String,
    pub reward: Option<i64>,
    pub photo_url: Option<String>,
    pub status: String,
    pub user_id: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct ChatRow {
    pub id: String,
    pub pet_id: String,
    pub user_id: String,
    pub owner_id: String,
    pub status: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub chat_id: String,
    pub sender_id: String,
    pub body: String,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct BannerRow {
    pub id: String,
    pub title: String,
    pub image_url: String,
    pub link_url: Option<String>,
    pub position: i64,
    pub active: bool,
    pub created_at: String,
}

/// Timestamp format written by every query: RFC 3339, millisecond precision,
/// so string order equals time order.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

fn parse_timestamp(raw: &str, row_id: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows inserted by hand through the sqlite shell use datetime('now').
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}' on row '{}': {}", raw, row_id, e);
            DateTime::default()
        })
}

fn parse_uuid(raw: &str, column: &str, row_id: &str) -> Uuid {
    raw.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}' on row '{}': {}", column, raw, row_id, e);
        Uuid::default()
    })
}

impl UserRow {
    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or_else(|e| {
            warn!("User '{}' has {}, treating as user", self.id, e);
            Role::User
        })
    }

    pub fn into_user(self) -> User {
        User {
            id: parse_uuid(&self.id, "id", &self.id),
            role: self.role(),
            created_at: parse_timestamp(&self.created_at, &self.id),
            email: self.email,
            name: self.name,
        }
    }
}

impl PetRow {
    pub fn into_listing(self) -> Listing {
        let kind = self.kind.parse().unwrap_or_else(|e| {
            warn!("Pet '{}' has {}, treating as lost", self.id, e);
            PetKind::Lost
        });
        let status = self.status.parse().unwrap_or_else(|e| {
            warn!("Pet '{}' has {}, treating as archived", self.id, e);
            PetStatus::Archived
        });

        Listing {
            id: parse_uuid(&self.id, "id", &self.id),
            kind,
            user_id: parse_uuid(&self.user_id, "user_id", &self.id),
            created_at: parse_timestamp(&self.created_at, &self.id),
            updated_at: parse_timestamp(&self.updated_at, &self.id),
            status,
            species: self.species,
            breed: self.breed,
            name: self.name,
            description: self.description,
            color: self.color,
            location: self.location,
            latitude: self.latitude,
            longitude: self.longitude,
            contact_name: self.contact_name,
            contact_phone: self.contact_phone,
            reward: self.reward,
            photo_url: self.photo_url,
        }
    }
}

impl ChatRow {
    pub fn into_chat(self) -> Chat {
        let status = self.status.parse().unwrap_or_else(|e| {
            warn!("Chat '{}' has {}, treating as archived", self.id, e);
            ChatStatus::Archived
        });

        Chat {
            id: parse_uuid(&self.id, "id", &self.id),
            pet_id: parse_uuid(&self.pet_id, "pet_id", &self.id),
            user_id: parse_uuid(&self.user_id, "user_id", &self.id),
            owner_id: parse_uuid(&self.owner_id, "owner_id", &self.id),
            status,
            created_at: parse_timestamp(&self.created_at, &self.id),
        }
    }
}

impl MessageRow {
    pub fn into_message(self) -> Message {
        Message {
            id: parse_uuid(&self.id, "id", &self.id),
            chat_id: parse_uuid(&self.chat_id, "chat_id", &self.id),
            sender_id: parse_uuid(&self.sender_id, "sender_id", &self.id),
            created_at: parse_timestamp(&self.created_at, &self.id),
            body: self.body,
        }
    }
}

impl BannerRow {
    pub fn into_banner(self) -> Banner {
        Banner {
            id: parse_uuid(&self.id, "id", &self.id),
            created_at: parse_timestamp(&self.created_at, &self.id),
            title: self.title,
            image_url: self.image_url,
            link_url: self.link_url,
            position: self.position,
            active: self.active,
        }
    }
}
