//! Database row types — these map directly to SQLite rows.
//! Distinct from amity-types API models to keep the DB layer independent.

use chrono::{DateTime, Utc};

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub display_name: String,
    pub password: String,
    pub bio: Option<String>,
    pub created_at: String,
}

pub struct SessionRow {
    pub token: String,
    pub user_id: String,
    pub expires_at: String,
}

#[derive(Debug)]
pub struct FriendRequestRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub status: String,
    pub created_at: String,
}

/// Pending request joined with sender profile fields for the inbox view.
pub struct PendingRequestRow {
    pub id: String,
    pub sender_id: String,
    pub sender_email: String,
    pub sender_display_name: String,
    pub sender_bio: Option<String>,
    pub created_at: String,
}

pub struct PrivateMessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub text: String,
    pub image_ref: Option<String>,
    pub read: bool,
    pub created_at: String,
}

pub struct GlobalMessageRow {
    pub id: String,
    pub sender_id: String,
    pub sender_display_name: String,
    pub text: String,
    pub image_ref: Option<String>,
    pub created_at: String,
}

/// Timestamps are written as RFC 3339 so they sort lexicographically.
/// Tolerate SQLite's bare "YYYY-MM-DD HH:MM:SS" form from hand-edited rows.
pub fn parse_timestamp(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::warn!("Corrupt timestamp '{}': {}", s, e);
            DateTime::default()
        })
}
