use axum::{
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use amity_types::error::ChatError;

use crate::auth::AppState;
use crate::error::ApiError;

/// Identity attached to authenticated requests. The token is kept so that
/// logout can destroy exactly the session that authorized it.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub token: String,
}

/// Extract the bearer session token and resolve it through the shared
/// SessionStore — the same store the WebSocket handshake consults.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers())
        .ok_or(ChatError::Unauthenticated)?
        .to_string();

    let user_id = state
        .sessions
        .resolve(&token)
        .await
        .ok_or(ChatError::Unauthenticated)?;

    req.extensions_mut().insert(AuthUser { id: user_id, token });
    Ok(next.run(req).await)
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}
