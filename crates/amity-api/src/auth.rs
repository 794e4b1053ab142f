use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use rand::RngCore;
use uuid::Uuid;

use amity_db::Database;
use amity_gateway::registry::ConnectionRegistry;
use amity_gateway::router::MessageRouter;
use amity_gateway::session::SessionStore;
use amity_types::api::{
    AuthResponse, CheckResponse, LoginRequest, RegisterRequest, UpdateBioRequest,
    UpdatePasswordRequest,
};
use amity_types::error::ChatError;

use crate::error::ApiError;
use crate::middleware::{AuthUser, bearer_token};
use crate::{blocking, user_summary};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub sessions: SessionStore,
    pub registry: ConnectionRegistry,
    pub router: MessageRouter,
    pub session_ttl: chrono::Duration,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    if email.len() < 3 || email.len() > 254 || !email.contains('@') {
        return Err(ApiError::bad_request("invalid email address"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::bad_request("password must be at least 8 characters"));
    }
    let display_name = req.display_name.trim().to_string();
    if display_name.is_empty() || display_name.len() > 64 {
        return Err(ApiError::bad_request("display name must be 1-64 characters"));
    }
    let bio = req.bio.map(|b| b.trim().to_string()).filter(|b| !b.is_empty());

    let db = state.db.clone();
    let lookup = email.clone();
    if blocking(move || db.get_user_by_email(&lookup)).await?.is_some() {
        return Err(ApiError::conflict("email already registered"));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::internal(format!("password hash failed: {}", e)))?
        .to_string();

    let user_id = Uuid::new_v4();

    let db = state.db.clone();
    let (insert_email, insert_name, insert_bio) = (email.clone(), display_name.clone(), bio.clone());
    blocking(move || {
        db.create_user(
            &user_id.to_string(),
            &insert_email,
            &insert_name,
            &password_hash,
            insert_bio.as_deref(),
            &Utc::now().to_rfc3339(),
        )
    })
    .await?;

    // Auto-login on register, like the login path
    let token = create_session(&state, user_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user_id,
            email,
            display_name,
            bio,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();

    let db = state.db.clone();
    let lookup = email.clone();
    let user = blocking(move || db.get_user_by_email(&lookup))
        .await?
        .ok_or_else(|| ApiError::unauthorized("invalid credentials"))?;

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| ApiError::internal(format!("stored hash unreadable: {}", e)))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::unauthorized("invalid credentials"))?;

    let user_id: Uuid = user
        .id
        .parse()
        .map_err(|e| ApiError::internal(format!("corrupt user id: {}", e)))?;

    let token = create_session(&state, user_id).await?;

    Ok(Json(AuthResponse {
        user_id,
        email: user.email,
        display_name: user.display_name,
        bio: user.bio,
        token,
    }))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    blocking(move || db.delete_session(&auth.token)).await?;
    Ok(Json(serde_json::json!({ "message": "Logged out successfully" })))
}

/// Public endpoint: reports whether the presented token (if any) resolves
/// to a live session. Never fails — an absent token is simply
/// unauthenticated.
pub async fn check(State(state): State<AppState>, headers: HeaderMap) -> Json<CheckResponse> {
    let user_id = match bearer_token(&headers) {
        Some(token) => state.sessions.resolve(token).await,
        None => None,
    };

    Json(CheckResponse {
        authenticated: user_id.is_some(),
        user_id,
    })
}

pub async fn update_bio(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<UpdateBioRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let bio = req.bio.trim().to_string();
    let user = blocking(move || -> Result<_, ChatError> {
        if !db.update_bio(&auth.id.to_string(), &bio)? {
            return Err(ChatError::NotFound);
        }
        let user = db
            .get_user_by_id(&auth.id.to_string())?
            .ok_or(ChatError::NotFound)?;
        Ok(user)
    })
    .await?;

    Ok(Json(user_summary(user)))
}

/// Change the caller's password. The current password must verify against
/// the stored hash before the new one is accepted and re-hashed.
pub async fn update_password(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    Json(req): Json<UpdatePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.new_password.len() < 8 {
        return Err(ApiError::bad_request("password must be at least 8 characters"));
    }

    let user_id = auth.id;
    let db = state.db.clone();
    let user = blocking(move || db.get_user_by_id(&user_id.to_string()))
        .await?
        .ok_or(ChatError::NotFound)?;

    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| ApiError::internal(format!("stored hash unreadable: {}", e)))?;

    Argon2::default()
        .verify_password(req.current_password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::unauthorized("current password is incorrect"))?;

    let salt = SaltString::generate(&mut OsRng);
    let new_hash = Argon2::default()
        .hash_password(req.new_password.as_bytes(), &salt)
        .map_err(|e| ApiError::internal(format!("password hash failed: {}", e)))?
        .to_string();

    let db = state.db.clone();
    blocking(move || -> Result<_, ChatError> {
        if !db.update_password(&user_id.to_string(), &new_hash)? {
            return Err(ChatError::NotFound);
        }
        Ok(())
    })
    .await?;

    Ok(Json(serde_json::json!({ "message": "Password updated successfully" })))
}

/// Mint an opaque session token: 32 random bytes, URL-safe base64. The
/// token is the only thing the client ever holds; all session state lives
/// server-side.
async fn create_session(state: &AppState, user_id: Uuid) -> Result<String, ApiError> {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let token = URL_SAFE_NO_PAD.encode(bytes);

    let now = Utc::now();
    let expires_at = (now + state.session_ttl).to_rfc3339();

    let db = state.db.clone();
    let stored = token.clone();
    blocking(move || {
        // Opportunistic sweep keeps the table from accumulating dead rows
        db.delete_expired_sessions(&now.to_rfc3339())?;
        db.insert_session(&stored, &user_id.to_string(), &expires_at)
    })
    .await?;

    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(password: &str) -> String {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .unwrap()
            .to_string()
    }

    fn seeded_state(password: &str) -> (AppState, Uuid) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user_id = Uuid::new_v4();
        db.create_user(
            &user_id.to_string(),
            "alice@test.io",
            "alice",
            &hash(password),
            None,
            &Utc::now().to_rfc3339(),
        )
        .unwrap();
        let registry = ConnectionRegistry::new();
        let state = Arc::new(AppStateInner {
            sessions: SessionStore::new(db.clone()),
            registry: registry.clone(),
            router: MessageRouter::new(db.clone(), registry),
            db,
            session_ttl: chrono::Duration::hours(24),
        });
        (state, user_id)
    }

    fn as_user(user_id: Uuid) -> Extension<AuthUser> {
        Extension(AuthUser {
            id: user_id,
            token: "tok".to_string(),
        })
    }

    fn stored_hash(state: &AppState, user_id: Uuid) -> String {
        state
            .db
            .get_user_by_id(&user_id.to_string())
            .unwrap()
            .unwrap()
            .password
    }

    fn change(current: &str, new: &str) -> Json<UpdatePasswordRequest> {
        Json(UpdatePasswordRequest {
            current_password: current.to_string(),
            new_password: new.to_string(),
        })
    }

    #[tokio::test]
    async fn update_password_rejects_wrong_current_password() {
        let (state, user_id) = seeded_state("first-password");
        let before = stored_hash(&state, user_id);

        let result = update_password(
            State(state.clone()),
            as_user(user_id),
            change("not-the-password", "second-password"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(stored_hash(&state, user_id), before);
    }

    #[tokio::test]
    async fn update_password_rejects_short_replacement() {
        let (state, user_id) = seeded_state("first-password");
        let before = stored_hash(&state, user_id);

        let result = update_password(
            State(state.clone()),
            as_user(user_id),
            change("first-password", "short"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(stored_hash(&state, user_id), before);
    }

    #[tokio::test]
    async fn update_password_rehashes_and_stores() {
        let (state, user_id) = seeded_state("first-password");

        let result = update_password(
            State(state.clone()),
            as_user(user_id),
            change("first-password", "second-password"),
        )
        .await;
        assert!(result.is_ok());

        let stored = stored_hash(&state, user_id);
        let parsed = PasswordHash::new(&stored).unwrap();
        assert!(
            Argon2::default()
                .verify_password(b"second-password", &parsed)
                .is_ok()
        );
        assert!(
            Argon2::default()
                .verify_password(b"first-password", &parsed)
                .is_err()
        );
    }
}
