use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use amity_db::Database;
use amity_types::events::{ChatCommand, ChatEvent};

use crate::registry::ConnectionRegistry;
use crate::router::MessageRouter;
use crate::session::SessionStore;

/// How long a fresh connection gets to present its session token before
/// the socket is dropped.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a connection handler needs, cloned per upgrade.
#[derive(Clone)]
pub struct Gateway {
    pub db: Arc<Database>,
    pub sessions: SessionStore,
    pub registry: ConnectionRegistry,
    pub router: MessageRouter,
}

/// Handle a single WebSocket connection. The client's first frame must be
/// an Identify carrying a session token; until that resolves, the
/// connection holds no identity and is never registered.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway) {
    let (mut sender, mut receiver) = socket.split();

    let (user_id, display_name) = match wait_for_identify(&mut receiver, &gateway).await {
        Some(identity) => identity,
        None => {
            warn!("WebSocket client failed to identify, refusing connection");
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "Unauthorized".into(),
                })))
                .await;
            return;
        }
    };

    info!("{} ({}) connected to gateway", display_name, user_id);

    let ready = ChatEvent::Ready {
        user_id,
        display_name: display_name.clone(),
    };
    let ready_json = match serde_json::to_string(&ready) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to encode Ready event: {}", e);
            return;
        }
    };
    if sender.send(Message::Text(ready_json.into())).await.is_err() {
        return;
    }

    // Register this connection under the user's personal channel
    let conn_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel();
    gateway.registry.register(user_id, conn_id, tx.clone());

    // Forward registry deliveries to the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode gateway event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Read commands from the client
    let router = gateway.router.clone();
    let display_name_recv = display_name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ChatCommand>(&text) {
                    Ok(cmd) => handle_command(&router, &tx, user_id, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            display_name_recv,
                            user_id,
                            e,
                            truncate_for_log(&text, 200)
                        );
                        let _ = tx.send(ChatEvent::Error {
                            code: "bad_command".to_string(),
                            message: e.to_string(),
                        });
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    gateway.registry.unregister(user_id, conn_id);
    info!("{} ({}) disconnected from gateway", display_name, user_id);
}

/// Run a command on behalf of an authenticated connection. Failures are
/// reported back only on this connection's own channel.
async fn handle_command(
    router: &MessageRouter,
    reply: &mpsc::UnboundedSender<ChatEvent>,
    user_id: Uuid,
    cmd: ChatCommand,
) {
    let result = match cmd {
        ChatCommand::Identify { .. } => return, // already handled
        ChatCommand::PrivateMessageSend { to, message } => router
            .send_private(user_id, to, message)
            .await
            .map(|_| ()),
        ChatCommand::GlobalMessageSend { message } => {
            router.send_global(user_id, message).await.map(|_| ())
        }
    };

    if let Err(e) = result {
        let _ = reply.send(ChatEvent::Error {
            code: e.code().to_string(),
            message: e.to_string(),
        });
    }
}

/// Cap a raw payload for logging without splitting a multi-byte character.
fn truncate_for_log(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Wait for the Identify command and resolve its token. Returns the user
/// id and display name, or `None` if the client never identified, the
/// token did not resolve, or the user row is gone. Generic over the frame
/// stream so the handshake can be driven without a live socket.
async fn wait_for_identify<S>(receiver: &mut S, gateway: &Gateway) -> Option<(Uuid, String)>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let identified = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ChatCommand::Identify { token }) =
                    serde_json::from_str::<ChatCommand>(&text)
                {
                    return gateway.sessions.resolve(&token).await;
                }
            }
        }
        None
    });

    let user_id = identified.await.ok().flatten()?;

    let db = gateway.db.clone();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_id(&user_id.to_string()))
        .await
        .ok()?
        .unwrap_or_else(|e| {
            warn!("User lookup failed during identify: {}", e);
            None
        })?;

    Some((user_id, user.display_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, Utc};
    use futures_util::stream;

    fn frame(json: &str) -> Result<Message, axum::Error> {
        Ok(Message::Text(json.to_string().into()))
    }

    fn gateway_with_session() -> (Gateway, Uuid) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user_id = Uuid::new_v4();
        db.create_user(
            &user_id.to_string(),
            "alice@test.io",
            "alice",
            "hash",
            None,
            &Utc::now().to_rfc3339(),
        )
        .unwrap();
        db.insert_session(
            "live-token",
            &user_id.to_string(),
            &(Utc::now() + ChronoDuration::hours(1)).to_rfc3339(),
        )
        .unwrap();

        let registry = ConnectionRegistry::new();
        let gateway = Gateway {
            sessions: SessionStore::new(db.clone()),
            registry: registry.clone(),
            router: MessageRouter::new(db.clone(), registry),
            db,
        };
        (gateway, user_id)
    }

    #[tokio::test]
    async fn identify_with_valid_token_yields_identity() {
        let (gateway, user_id) = gateway_with_session();
        let mut frames = stream::iter(vec![frame(
            r#"{"type":"Identify","data":{"token":"live-token"}}"#,
        )]);

        let identity = wait_for_identify(&mut frames, &gateway).await;

        assert_eq!(identity, Some((user_id, "alice".to_string())));
    }

    #[tokio::test]
    async fn identify_with_invalid_token_is_refused_and_never_registered() {
        let (gateway, user_id) = gateway_with_session();
        let mut frames = stream::iter(vec![frame(
            r#"{"type":"Identify","data":{"token":"no-such-token"}}"#,
        )]);

        let identity = wait_for_identify(&mut frames, &gateway).await;

        assert_eq!(identity, None);
        assert_eq!(gateway.registry.connection_count(user_id), 0);
    }

    #[tokio::test]
    async fn identify_skips_other_frames_until_the_token_arrives() {
        let (gateway, user_id) = gateway_with_session();
        let mut frames = stream::iter(vec![
            frame(r#"{"type":"GlobalMessageSend","data":{"message":{"text":"hi"}}}"#),
            frame("not even json"),
            frame(r#"{"type":"Identify","data":{"token":"live-token"}}"#),
        ]);

        let identity = wait_for_identify(&mut frames, &gateway).await;

        assert_eq!(identity.map(|(id, _)| id), Some(user_id));
    }

    #[tokio::test]
    async fn stream_ending_without_identify_is_refused() {
        let (gateway, _) = gateway_with_session();
        let mut frames = stream::iter(Vec::<Result<Message, axum::Error>>::new());

        assert_eq!(wait_for_identify(&mut frames, &gateway).await, None);
    }

    #[test]
    fn log_truncation_lands_on_a_char_boundary() {
        let mut oversized = "x".repeat(199);
        oversized.push_str("€€€"); // 3-byte chars straddle the cap
        assert_eq!(truncate_for_log(&oversized, 200), &oversized[..199]);

        assert_eq!(truncate_for_log("short", 200), "short");
        let exact = "y".repeat(200);
        assert_eq!(truncate_for_log(&exact, 200), exact);
    }
}
