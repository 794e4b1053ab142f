use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use amity_db::models::FriendRequestRow;
use amity_db::models::parse_timestamp;
use amity_types::api::{
    FriendRequestResponse, FriendRequestStatus, PendingFriendRequest, RespondFriendRequestRequest,
    SendFriendRequestRequest, UserSummary,
};
use amity_types::error::ChatError;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::AuthUser;
use crate::{blocking, parse_uuid, user_summary};

pub async fn send_friend_request(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<SendFriendRequestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let request_id = Uuid::new_v4();
    let receiver_id = req.receiver_id;

    let row = blocking(move || -> Result<_, ChatError> {
        if db.get_user_by_id(&receiver_id.to_string())?.is_none() {
            return Err(ChatError::NotFound);
        }
        db.send_friend_request(
            &request_id.to_string(),
            &auth.id.to_string(),
            &receiver_id.to_string(),
            &Utc::now().to_rfc3339(),
        )
    })
    .await?;

    Ok((StatusCode::CREATED, Json(request_response(row))))
}

pub async fn list_friend_requests(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let rows = blocking(move || db.list_pending_requests(&auth.id.to_string())).await?;

    let requests: Vec<PendingFriendRequest> = rows
        .into_iter()
        .map(|row| PendingFriendRequest {
            id: parse_uuid(&row.id, "request id"),
            sender: UserSummary {
                id: parse_uuid(&row.sender_id, "sender id"),
                email: row.sender_email,
                display_name: row.sender_display_name,
                bio: row.sender_bio,
            },
            created_at: parse_timestamp(&row.created_at),
        })
        .collect();

    Ok(Json(requests))
}

pub async fn respond_friend_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<RespondFriendRequestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let row = blocking(move || {
        db.respond_friend_request(&request_id.to_string(), &auth.id.to_string(), req.status)
    })
    .await?;

    Ok(Json(request_response(row)))
}

pub async fn list_friends(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let rows = blocking(move || db.list_friends(&auth.id.to_string())).await?;

    let friends: Vec<UserSummary> = rows.into_iter().map(user_summary).collect();
    Ok(Json(friends))
}

/// Everyone except the caller, for the "find friends" view.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let rows = blocking(move || db.list_users_except(&auth.id.to_string())).await?;

    let users: Vec<UserSummary> = rows.into_iter().map(user_summary).collect();
    Ok(Json(users))
}

fn request_response(row: FriendRequestRow) -> FriendRequestResponse {
    FriendRequestResponse {
        id: parse_uuid(&row.id, "request id"),
        sender_id: parse_uuid(&row.sender_id, "sender id"),
        receiver_id: parse_uuid(&row.receiver_id, "receiver id"),
        status: FriendRequestStatus::parse(&row.status).unwrap_or_else(|| {
            warn!("Corrupt status '{}' on request '{}'", row.status, row.id);
            FriendRequestStatus::Pending
        }),
        created_at: parse_timestamp(&row.created_at),
    }
}
