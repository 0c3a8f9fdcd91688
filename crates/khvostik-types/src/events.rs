use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Events pushed over the realtime WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid },

    /// Confirms which of the requested chats the connection now follows
    Subscribed { chat_ids: Vec<Uuid> },

    /// A new message was appended to a chat
    MessageCreate { message: Message },

    /// Someone opened a chat on one of the recipient's listings
    ChatOpened {
        chat_id: Uuid,
        pet_id: Uuid,
        user_id: Uuid,
    },

    /// The listing owner (or an admin) archived the chat
    ChatArchived { chat_id: Uuid },

    /// An admin restored an archived chat
    ChatRestored { chat_id: Uuid },
}

impl RealtimeEvent {
    /// Returns the chat this event belongs to, if it is chat-scoped.
    /// Chat-scoped events only reach connections subscribed to that chat.
    pub fn chat_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { message } => Some(message.chat_id),
            Self::ChatArchived { chat_id } => Some(*chat_id),
            Self::ChatRestored { chat_id } => Some(*chat_id),
            // Ready, Subscribed and ChatOpened are sent to a single user
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum RealtimeCommand {
    /// Authenticate the connection
    Identify { token: String },

    /// Replace the set of followed chats
    Subscribe { chat_ids: Vec<Uuid> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_use_type_data_tagging() {
        let cmd: RealtimeCommand =
            serde_json::from_str(r#"{"type":"Identify","data":{"token":"abc"}}"#).unwrap();
        assert!(matches!(cmd, RealtimeCommand::Identify { token } if token == "abc"));
    }

    #[test]
    fn chat_scoped_events_report_their_chat() {
        let chat_id = Uuid::new_v4();
        assert_eq!(RealtimeEvent::ChatArchived { chat_id }.chat_id(), Some(chat_id));
        let opened = RealtimeEvent::ChatOpened {
            chat_id,
            pet_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        };
        assert_eq!(opened.chat_id(), None);
    }
}
