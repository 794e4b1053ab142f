use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

use amity_db::models::parse_timestamp;
use amity_types::api::{GlobalMessageResponse, PrivateMessageResponse};
use amity_types::events::MessageContent;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::{blocking, parse_uuid};

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// Full conversation with one friend, ascending by creation time.
pub async fn get_private_messages(
    State(state): State<AppState>,
    Path(friend_id): Path<Uuid>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let rows =
        blocking(move || db.private_history(&auth.id.to_string(), &friend_id.to_string())).await?;

    let messages: Vec<PrivateMessageResponse> = rows
        .into_iter()
        .map(|row| PrivateMessageResponse {
            id: parse_uuid(&row.id, "message id"),
            sender_id: parse_uuid(&row.sender_id, "sender id"),
            receiver_id: parse_uuid(&row.receiver_id, "receiver id"),
            message: MessageContent {
                text: row.text,
                image_ref: row.image_ref,
            },
            read: row.read,
            created_at: parse_timestamp(&row.created_at),
        })
        .collect();

    Ok(Json(messages))
}

/// HTTP send goes through the same MessageRouter as the gateway, so
/// friend gating, persistence ordering, and fan-out behave identically on
/// both paths.
pub async fn send_private_message(
    State(state): State<AppState>,
    Path(friend_id): Path<Uuid>,
    Extension(auth): Extension<AuthUser>,
    Json(message): Json<MessageContent>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state.router.send_private(auth.id, friend_id, message).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_global_messages(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
    Extension(_auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let limit = query.limit.min(200);
    let rows = blocking(move || db.global_history(limit)).await?;

    let messages: Vec<GlobalMessageResponse> = rows
        .into_iter()
        .map(|row| GlobalMessageResponse {
            id: parse_uuid(&row.id, "message id"),
            sender_id: parse_uuid(&row.sender_id, "sender id"),
            sender_display_name: row.sender_display_name,
            message: MessageContent {
                text: row.text,
                image_ref: row.image_ref,
            },
            created_at: parse_timestamp(&row.created_at),
        })
        .collect();

    Ok(Json(messages))
}

pub async fn send_global_message(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(message): Json<MessageContent>,
) -> Result<impl IntoResponse, ApiError> {
    let response = state.router.send_global(auth.id, message).await?;
    Ok((StatusCode::CREATED, Json(response)))
}
