pub mod auth;
pub mod error;
pub mod friends;
pub mod messages;
pub mod middleware;

use tracing::{error, warn};
use uuid::Uuid;

use amity_db::models::UserRow;
use amity_types::api::UserSummary;
use amity_types::error::ChatError;

use crate::error::ApiError;

/// Run blocking DB work off the async runtime.
pub(crate) async fn blocking<T, E, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::from(ChatError::Storage(anyhow::anyhow!(
                "blocking task failed: {}",
                e
            )))
        })?
        .map_err(Into::into)
}

pub(crate) fn parse_uuid(s: &str, context: &str) -> Uuid {
    s.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", context, s, e);
        Uuid::default()
    })
}

pub(crate) fn user_summary(row: UserRow) -> UserSummary {
    UserSummary {
        id: parse_uuid(&row.id, "user id"),
        email: row.email,
        display_name: row.display_name,
        bio: row.bio,
    }
}
