use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::MessageContent;

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub display_name: String,
    #[serde(default)]
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Returned by both register and login — a fresh session is established
/// in either case, matching the original auto-login-on-register behavior.
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub bio: Option<String>,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateBioRequest {
    pub bio: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdatePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

// -- Users --

#[derive(Debug, Clone, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub bio: Option<String>,
}

// -- Friend requests --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendRequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl FriendRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendFriendRequestRequest {
    pub receiver_id: Uuid,
}

/// Decision on a pending request. `pending` is not a legal decision, so
/// this is a separate two-variant enum rather than FriendRequestStatus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendRequestDecision {
    Accepted,
    Rejected,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RespondFriendRequestRequest {
    pub status: FriendRequestDecision,
}

#[derive(Debug, Serialize)]
pub struct FriendRequestResponse {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub status: FriendRequestStatus,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Pending request as shown in the requests inbox, with sender profile
/// fields the UI displays.
#[derive(Debug, Serialize)]
pub struct PendingFriendRequest {
    pub id: Uuid,
    pub sender: UserSummary,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// -- Messages --

#[derive(Debug, Serialize)]
pub struct PrivateMessageResponse {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub message: MessageContent,
    pub read: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct GlobalMessageResponse {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub sender_display_name: String,
    pub message: MessageContent,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
