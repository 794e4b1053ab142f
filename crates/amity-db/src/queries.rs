use crate::Database;
use crate::models::{
    FriendRequestRow, GlobalMessageRow, PendingRequestRow, PrivateMessageRow, SessionRow, UserRow,
};
use amity_types::api::FriendRequestDecision;
use amity_types::error::ChatError;
use anyhow::Result;
use rusqlite::Connection;

fn storage(e: rusqlite::Error) -> ChatError {
    ChatError::Storage(e.into())
}

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        id: &str,
        email: &str,
        display_name: &str,
        password_hash: &str,
        bio: Option<&str>,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, email, display_name, password, bio, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, email, display_name, password_hash, bio, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn update_bio(&self, id: &str, bio: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute("UPDATE users SET bio = ?1 WHERE id = ?2", (bio, id))?;
            Ok(updated > 0)
        })
    }

    pub fn update_password(&self, id: &str, password_hash: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET password = ?1 WHERE id = ?2",
                (password_hash, id),
            )?;
            Ok(updated > 0)
        })
    }

    /// Everyone except the requesting user, for the "find friends" view.
    pub fn list_users_except(&self, id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, email, display_name, password, bio, created_at
                 FROM users WHERE id != ?1 ORDER BY display_name",
            )?;
            let rows = stmt
                .query_map([id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Sessions --

    pub fn insert_session(&self, token: &str, user_id: &str, expires_at: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (token, user_id, expires_at) VALUES (?1, ?2, ?3)",
                (token, user_id, expires_at),
            )?;
            Ok(())
        })
    }

    pub fn get_session(&self, token: &str) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT token, user_id, expires_at FROM sessions WHERE token = ?1",
                    [token],
                    |row| {
                        Ok(SessionRow {
                            token: row.get(0)?,
                            user_id: row.get(1)?,
                            expires_at: row.get(2)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    pub fn delete_session(&self, token: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM sessions WHERE token = ?1", [token])?;
            Ok(deleted > 0)
        })
    }

    pub fn delete_expired_sessions(&self, now: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let deleted = conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", [now])?;
            Ok(deleted)
        })
    }

    // -- Friend graph --

    /// Create a pending friend request. The UNIQUE(sender_id, receiver_id)
    /// constraint enforces at-most-one request per ordered pair atomically,
    /// so a concurrent duplicate send loses cleanly.
    pub fn send_friend_request(
        &self,
        id: &str,
        sender_id: &str,
        receiver_id: &str,
        created_at: &str,
    ) -> std::result::Result<FriendRequestRow, ChatError> {
        if sender_id == receiver_id {
            return Err(ChatError::SelfRequest);
        }

        self.with_conn(|conn| {
            match conn.execute(
                "INSERT INTO friend_requests (id, sender_id, receiver_id, status, created_at)
                 VALUES (?1, ?2, ?3, 'pending', ?4)",
                rusqlite::params![id, sender_id, receiver_id, created_at],
            ) {
                Ok(_) => Ok(FriendRequestRow {
                    id: id.to_string(),
                    sender_id: sender_id.to_string(),
                    receiver_id: receiver_id.to_string(),
                    status: "pending".to_string(),
                    created_at: created_at.to_string(),
                }),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(ChatError::DuplicateRequest)
                }
                Err(e) => Err(storage(e)),
            }
        })
    }

    /// Resolve a pending request. The status flip is a compare-and-set
    /// (`WHERE status = 'pending'`) inside one transaction with the
    /// friendship inserts, so two concurrent responders cannot both win
    /// and the friend-add is never applied without the status change.
    pub fn respond_friend_request(
        &self,
        request_id: &str,
        acting_user: &str,
        decision: FriendRequestDecision,
    ) -> std::result::Result<FriendRequestRow, ChatError> {
        let status = match decision {
            FriendRequestDecision::Accepted => "accepted",
            FriendRequestDecision::Rejected => "rejected",
        };

        self.with_conn_mut(|conn| {
            let tx = conn.transaction().map_err(storage)?;

            let row = query_friend_request(&tx, request_id)
                .map_err(ChatError::Storage)?
                .ok_or(ChatError::NotFound)?;

            if row.receiver_id != acting_user {
                return Err(ChatError::Forbidden);
            }

            let updated = tx
                .execute(
                    "UPDATE friend_requests SET status = ?1 WHERE id = ?2 AND status = 'pending'",
                    (status, request_id),
                )
                .map_err(storage)?;
            if updated == 0 {
                return Err(ChatError::AlreadyResolved);
            }

            if decision == FriendRequestDecision::Accepted {
                // Set-union semantics: repeats are a no-op
                tx.execute(
                    "INSERT OR IGNORE INTO friends (user_id, friend_id) VALUES (?1, ?2)",
                    (&row.sender_id, &row.receiver_id),
                )
                .map_err(storage)?;
                tx.execute(
                    "INSERT OR IGNORE INTO friends (user_id, friend_id) VALUES (?1, ?2)",
                    (&row.receiver_id, &row.sender_id),
                )
                .map_err(storage)?;
            }

            tx.commit().map_err(storage)?;

            Ok(FriendRequestRow {
                status: status.to_string(),
                ..row
            })
        })
    }

    /// Pending requests addressed to `user_id`, with sender profile fields.
    pub fn list_pending_requests(&self, user_id: &str) -> Result<Vec<PendingRequestRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.sender_id, u.email, u.display_name, u.bio, r.created_at
                 FROM friend_requests r
                 JOIN users u ON r.sender_id = u.id
                 WHERE r.receiver_id = ?1 AND r.status = 'pending'
                 ORDER BY r.created_at",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(PendingRequestRow {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                        sender_email: row.get(2)?,
                        sender_display_name: row.get(3)?,
                        sender_bio: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn list_friends(&self, user_id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.email, u.display_name, u.password, u.bio, u.created_at
                 FROM friends f
                 JOIN users u ON f.friend_id = u.id
                 WHERE f.user_id = ?1
                 ORDER BY u.display_name",
            )?;
            let rows = stmt
                .query_map([user_id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn are_friends(&self, a: &str, b: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM friends WHERE user_id = ?1 AND friend_id = ?2",
                    (a, b),
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    // -- Private messages --

    pub fn insert_private_message(
        &self,
        id: &str,
        sender_id: &str,
        receiver_id: &str,
        text: &str,
        image_ref: Option<&str>,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO private_messages (id, sender_id, receiver_id, text, image_ref, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, sender_id, receiver_id, text, image_ref, created_at],
            )?;
            Ok(())
        })
    }

    /// Full conversation between two users, both directions, ascending.
    pub fn private_history(&self, a: &str, b: &str) -> Result<Vec<PrivateMessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, receiver_id, text, image_ref, read, created_at
                 FROM private_messages
                 WHERE (sender_id = ?1 AND receiver_id = ?2)
                    OR (sender_id = ?2 AND receiver_id = ?1)
                 ORDER BY created_at ASC",
            )?;
            let rows = stmt
                .query_map((a, b), |row| {
                    Ok(PrivateMessageRow {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                        receiver_id: row.get(2)?,
                        text: row.get(3)?,
                        image_ref: row.get(4)?,
                        read: row.get::<_, i64>(5)? != 0,
                        created_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Global messages --

    pub fn insert_global_message(
        &self,
        id: &str,
        sender_id: &str,
        text: &str,
        image_ref: Option<&str>,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO global_messages (id, sender_id, text, image_ref, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, sender_id, text, image_ref, created_at],
            )?;
            Ok(())
        })
    }

    /// Most recent `limit` global messages, returned oldest-first.
    pub fn global_history(&self, limit: u32) -> Result<Vec<GlobalMessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.sender_id, u.display_name, m.text, m.image_ref, m.created_at
                 FROM global_messages m
                 LEFT JOIN users u ON m.sender_id = u.id
                 ORDER BY m.created_at DESC
                 LIMIT ?1",
            )?;
            let mut rows = stmt
                .query_map([limit], |row| {
                    Ok(GlobalMessageRow {
                        id: row.get(0)?,
                        sender_id: row.get(1)?,
                        sender_display_name: row
                            .get::<_, Option<String>>(2)?
                            .unwrap_or_else(|| "unknown".to_string()),
                        text: row.get(3)?,
                        image_ref: row.get(4)?,
                        created_at: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows.reverse();
            Ok(rows)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is a compile-time constant, never user input
    let sql = format!(
        "SELECT id, email, display_name, password, bio, created_at FROM users WHERE {} = ?1",
        column
    );
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt.query_row([value], user_from_row).optional()?;
    Ok(row)
}

fn user_from_row(row: &rusqlite::Row<'_>) -> std::result::Result<UserRow, rusqlite::Error> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        password: row.get(3)?,
        bio: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn query_friend_request(conn: &Connection, id: &str) -> Result<Option<FriendRequestRow>> {
    conn.query_row(
        "SELECT id, sender_id, receiver_id, status, created_at
         FROM friend_requests WHERE id = ?1",
        [id],
        |row| {
            Ok(FriendRequestRow {
                id: row.get(0)?,
                sender_id: row.get(1)?,
                receiver_id: row.get(2)?,
                status: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )
    .optional()
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn seed_user(db: &Database, email: &str) -> String {
        let id = Uuid::new_v4().to_string();
        db.create_user(
            &id,
            email,
            email.split('@').next().unwrap(),
            "hash",
            None,
            &chrono::Utc::now().to_rfc3339(),
        )
        .unwrap();
        id
    }

    fn send_request(db: &Database, sender: &str, receiver: &str) -> FriendRequestRow {
        db.send_friend_request(
            &Uuid::new_v4().to_string(),
            sender,
            receiver,
            &chrono::Utc::now().to_rfc3339(),
        )
        .unwrap()
    }

    #[test]
    fn friend_request_rejects_self() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "a@test.io");

        let err = db
            .send_friend_request(&Uuid::new_v4().to_string(), &a, &a, "2026-01-01T00:00:00Z")
            .unwrap_err();
        assert!(matches!(err, ChatError::SelfRequest));
    }

    #[test]
    fn friend_request_unique_per_ordered_pair() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "a@test.io");
        let b = seed_user(&db, "b@test.io");

        send_request(&db, &a, &b);
        let err = db
            .send_friend_request(&Uuid::new_v4().to_string(), &a, &b, "2026-01-01T00:00:00Z")
            .unwrap_err();
        assert!(matches!(err, ChatError::DuplicateRequest));

        // The reverse direction is a different ordered pair
        send_request(&db, &b, &a);
    }

    #[test]
    fn accept_is_symmetric_and_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "a@test.io");
        let b = seed_user(&db, "b@test.io");

        // Pre-existing one-way row must not break the set union
        db.with_conn::<_, _, anyhow::Error>(|conn| {
            conn.execute(
                "INSERT INTO friends (user_id, friend_id) VALUES (?1, ?2)",
                (&a, &b),
            )?;
            Ok(())
        })
        .unwrap();

        let req = send_request(&db, &a, &b);
        let resolved = db
            .respond_friend_request(&req.id, &b, FriendRequestDecision::Accepted)
            .unwrap();
        assert_eq!(resolved.status, "accepted");

        assert!(db.are_friends(&a, &b).unwrap());
        assert!(db.are_friends(&b, &a).unwrap());

        let friends_of_a = db.list_friends(&a).unwrap();
        assert_eq!(friends_of_a.len(), 1);
        assert_eq!(friends_of_a[0].id, b);
    }

    #[test]
    fn respond_requires_receiver() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "a@test.io");
        let b = seed_user(&db, "b@test.io");
        let c = seed_user(&db, "c@test.io");

        let req = send_request(&db, &a, &b);

        // The sender cannot accept their own request, nor can a bystander
        for actor in [&a, &c] {
            let err = db
                .respond_friend_request(&req.id, actor, FriendRequestDecision::Accepted)
                .unwrap_err();
            assert!(matches!(err, ChatError::Forbidden));
        }

        let err = db
            .respond_friend_request(
                &Uuid::new_v4().to_string(),
                &b,
                FriendRequestDecision::Accepted,
            )
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound));
    }

    #[test]
    fn status_is_terminal_once_resolved() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "a@test.io");
        let b = seed_user(&db, "b@test.io");

        let req = send_request(&db, &a, &b);
        db.respond_friend_request(&req.id, &b, FriendRequestDecision::Rejected)
            .unwrap();

        for decision in [FriendRequestDecision::Accepted, FriendRequestDecision::Rejected] {
            let err = db.respond_friend_request(&req.id, &b, decision).unwrap_err();
            assert!(matches!(err, ChatError::AlreadyResolved));
        }

        // Rejection never created a friendship
        assert!(!db.are_friends(&a, &b).unwrap());
    }

    #[test]
    fn resend_after_accept_is_duplicate() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "a@test.io");
        let b = seed_user(&db, "b@test.io");

        let req = send_request(&db, &a, &b);
        db.respond_friend_request(&req.id, &b, FriendRequestDecision::Accepted)
            .unwrap();

        let err = db
            .send_friend_request(&Uuid::new_v4().to_string(), &a, &b, "2026-01-01T00:00:00Z")
            .unwrap_err();
        assert!(matches!(err, ChatError::DuplicateRequest));
    }

    #[test]
    fn pending_list_only_contains_pending_addressed_to_user() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "a@test.io");
        let b = seed_user(&db, "b@test.io");
        let c = seed_user(&db, "c@test.io");

        let from_a = send_request(&db, &a, &b);
        send_request(&db, &c, &b);
        send_request(&db, &b, &c); // addressed to c, not b

        db.respond_friend_request(&from_a.id, &b, FriendRequestDecision::Rejected)
            .unwrap();

        let pending = db.list_pending_requests(&b).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].sender_id, c);
        assert_eq!(pending[0].sender_email, "c@test.io");
    }

    #[test]
    fn private_history_is_ascending_across_both_directions() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "a@test.io");
        let b = seed_user(&db, "b@test.io");
        let c = seed_user(&db, "c@test.io");

        let base = chrono::Utc::now();
        for (i, (from, to)) in [(&a, &b), (&b, &a), (&a, &b), (&b, &a)].iter().enumerate() {
            let ts = (base + chrono::Duration::seconds(i as i64)).to_rfc3339();
            db.insert_private_message(
                &Uuid::new_v4().to_string(),
                from,
                to,
                &format!("msg {}", i),
                None,
                &ts,
            )
            .unwrap();
        }
        // Unrelated conversation must not leak in
        db.insert_private_message(
            &Uuid::new_v4().to_string(),
            &a,
            &c,
            "other",
            None,
            &base.to_rfc3339(),
        )
        .unwrap();

        let history = db.private_history(&a, &b).unwrap();
        assert_eq!(history.len(), 4);
        for pair in history.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
        assert_eq!(history[0].text, "msg 0");
        assert_eq!(history[3].text, "msg 3");
    }

    #[test]
    fn global_history_returns_most_recent_oldest_first() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "a@test.io");

        let base = chrono::Utc::now();
        for i in 0..5 {
            let ts = (base + chrono::Duration::seconds(i)).to_rfc3339();
            db.insert_global_message(
                &Uuid::new_v4().to_string(),
                &a,
                &format!("msg {}", i),
                None,
                &ts,
            )
            .unwrap();
        }

        let history = db.global_history(3).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].text, "msg 2");
        assert_eq!(history[2].text, "msg 4");
        assert_eq!(history[0].sender_display_name, "a");
    }

    #[test]
    fn sessions_roundtrip_and_expiry_sweep() {
        let db = Database::open_in_memory().unwrap();
        let a = seed_user(&db, "a@test.io");

        let now = chrono::Utc::now();
        db.insert_session("tok-live", &a, &(now + chrono::Duration::hours(1)).to_rfc3339())
            .unwrap();
        db.insert_session("tok-dead", &a, &(now - chrono::Duration::hours(1)).to_rfc3339())
            .unwrap();

        assert!(db.get_session("tok-live").unwrap().is_some());
        assert!(db.get_session("nope").unwrap().is_none());

        let swept = db.delete_expired_sessions(&now.to_rfc3339()).unwrap();
        assert_eq!(swept, 1);
        assert!(db.get_session("tok-dead").unwrap().is_none());

        assert!(db.delete_session("tok-live").unwrap());
        assert!(!db.delete_session("tok-live").unwrap());
    }
}
