use std::sync::Arc;

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use amity_db::Database;
use amity_db::models::parse_timestamp;

/// Read-side view of the session table, shared by the HTTP auth middleware
/// and the WebSocket handshake. Sessions are written only by the auth
/// handlers; this store never creates or mutates one.
#[derive(Clone)]
pub struct SessionStore {
    db: Arc<Database>,
}

impl SessionStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Resolve an opaque session token to a user id. Unknown, expired, or
    /// malformed tokens resolve to `None`; storage failures are logged and
    /// also resolve to `None` rather than surfacing to the caller.
    pub async fn resolve(&self, token: &str) -> Option<Uuid> {
        if token.is_empty() {
            return None;
        }

        let db = self.db.clone();
        let lookup = token.to_string();
        let row = tokio::task::spawn_blocking(move || db.get_session(&lookup))
            .await
            .ok()?
            .unwrap_or_else(|e| {
                warn!("Session lookup failed: {}", e);
                None
            })?;

        if parse_timestamp(&row.expires_at) <= Utc::now() {
            // Expired rows are treated as absent; sweep this one now
            let db = self.db.clone();
            let stale = row.token.clone();
            let _ = tokio::task::spawn_blocking(move || {
                if let Err(e) = db.delete_session(&stale) {
                    warn!("Failed to sweep expired session: {}", e);
                }
            });
            return None;
        }

        match row.user_id.parse() {
            Ok(user_id) => Some(user_id),
            Err(e) => {
                warn!("Corrupt user_id '{}' on session: {}", row.user_id, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store_with_user() -> (SessionStore, String) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let user_id = Uuid::new_v4().to_string();
        db.create_user(&user_id, "a@test.io", "a", "hash", None, &Utc::now().to_rfc3339())
            .unwrap();
        (SessionStore::new(db), user_id)
    }

    #[tokio::test]
    async fn resolves_valid_token() {
        let (store, user_id) = store_with_user();
        store
            .db
            .insert_session("tok", &user_id, &(Utc::now() + Duration::hours(1)).to_rfc3339())
            .unwrap();

        assert_eq!(store.resolve("tok").await, user_id.parse().ok());
    }

    #[tokio::test]
    async fn unknown_and_empty_tokens_resolve_to_none() {
        let (store, _) = store_with_user();
        assert_eq!(store.resolve("no-such-token").await, None);
        assert_eq!(store.resolve("").await, None);
    }

    #[tokio::test]
    async fn expired_token_resolves_to_none() {
        let (store, user_id) = store_with_user();
        store
            .db
            .insert_session("old", &user_id, &(Utc::now() - Duration::minutes(1)).to_rfc3339())
            .unwrap();

        assert_eq!(store.resolve("old").await, None);
    }
}
