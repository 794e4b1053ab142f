use std::sync::Arc;

use chrono::Utc;
use tracing::error;
use uuid::Uuid;

use amity_db::Database;
use amity_types::api::{GlobalMessageResponse, PrivateMessageResponse};
use amity_types::error::ChatError;
use amity_types::events::{ChatEvent, MessageContent};

use crate::registry::ConnectionRegistry;

/// Single dispatch path for chat messages, shared by the WebSocket gateway
/// and the HTTP message endpoints: validate, persist, then fan out. A
/// message that fails to persist is never delivered.
#[derive(Clone)]
pub struct MessageRouter {
    db: Arc<Database>,
    registry: ConnectionRegistry,
}

impl MessageRouter {
    pub fn new(db: Arc<Database>, registry: ConnectionRegistry) -> Self {
        Self { db, registry }
    }

    /// Send a direct message. The sender and receiver must be friends;
    /// this is enforced here, server-side, not left to the client UI.
    /// Delivery goes to the receiver's connections only — the sender's own
    /// client appends locally and receives no echo.
    pub async fn send_private(
        &self,
        sender: Uuid,
        to: Uuid,
        message: MessageContent,
    ) -> Result<PrivateMessageResponse, ChatError> {
        if message.is_empty() {
            return Err(ChatError::InvalidMessage);
        }

        let id = Uuid::new_v4();
        let now = Utc::now();

        let db = self.db.clone();
        let content = message.clone();
        tokio::task::spawn_blocking(move || {
            if !db.are_friends(&sender.to_string(), &to.to_string())? {
                return Err(ChatError::Forbidden);
            }
            db.insert_private_message(
                &id.to_string(),
                &sender.to_string(),
                &to.to_string(),
                &content.text,
                content.image_ref.as_deref(),
                &now.to_rfc3339(),
            )?;
            Ok(())
        })
        .await
        .map_err(join_error)??;

        // Fan out only after the write landed
        self.registry.deliver(
            to,
            &ChatEvent::PrivateMessage {
                id,
                from: sender,
                message: message.clone(),
                timestamp: now,
            },
        );

        Ok(PrivateMessageResponse {
            id,
            sender_id: sender,
            receiver_id: to,
            message,
            read: false,
            created_at: now,
        })
    }

    /// Send to the global channel. Broadcast reaches every open connection,
    /// including the sender's other tabs.
    pub async fn send_global(
        &self,
        sender: Uuid,
        message: MessageContent,
    ) -> Result<GlobalMessageResponse, ChatError> {
        if message.is_empty() {
            return Err(ChatError::InvalidMessage);
        }

        let id = Uuid::new_v4();
        let now = Utc::now();

        let db = self.db.clone();
        let content = message.clone();
        let display_name = tokio::task::spawn_blocking(move || {
            let user = db
                .get_user_by_id(&sender.to_string())?
                .ok_or(ChatError::Unauthenticated)?;
            db.insert_global_message(
                &id.to_string(),
                &sender.to_string(),
                &content.text,
                content.image_ref.as_deref(),
                &now.to_rfc3339(),
            )?;
            Ok::<_, ChatError>(user.display_name)
        })
        .await
        .map_err(join_error)??;

        self.registry.broadcast(&ChatEvent::GlobalMessage {
            id,
            from: sender,
            from_display_name: display_name.clone(),
            message: message.clone(),
            timestamp: now,
        });

        Ok(GlobalMessageResponse {
            id,
            sender_id: sender,
            sender_display_name: display_name,
            message,
            created_at: now,
        })
    }
}

fn join_error(e: tokio::task::JoinError) -> ChatError {
    error!("spawn_blocking join error: {}", e);
    ChatError::Storage(anyhow::anyhow!("blocking task failed: {}", e))
}
