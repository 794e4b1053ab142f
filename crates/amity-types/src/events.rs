use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Message body shared by private and global chat. Image uploads happen
/// out of band; `image_ref` is the reference string returned by the file
/// storage service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageContent {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub image_ref: Option<String>,
}

impl MessageContent {
    /// A message must carry text or an image to be worth persisting.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
            && self.image_ref.as_deref().map_or(true, |r| r.is_empty())
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatCommand {
    /// Authenticate the WebSocket connection with a session token
    Identify { token: String },

    /// Send a direct message to a friend
    PrivateMessageSend {
        to: Uuid,
        #[serde(default)]
        message: MessageContent,
    },

    /// Send a message to the global channel
    GlobalMessageSend {
        #[serde(default)]
        message: MessageContent,
    },
}

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, display_name: String },

    /// A direct message addressed to this user. The sender's own
    /// connections never receive this; the client UI appends locally.
    PrivateMessage {
        id: Uuid,
        from: Uuid,
        message: MessageContent,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A message on the global channel, delivered to every open
    /// connection including the sender's other tabs.
    GlobalMessage {
        id: Uuid,
        from: Uuid,
        from_display_name: String,
        message: MessageContent,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A command from this connection was rejected. Only ever sent to the
    /// originating connection.
    Error { code: String, message: String },
}
