use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use uuid::Uuid;

use crate::error::Result;

/// The authority's own login sessions.
///
/// A live session is what lets `GET /login` and `GET /api/auth/token` mint a
/// fresh access token silently instead of re-prompting for credentials.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates a session for the user and returns its id.
    async fn create(&self, user_id: Uuid, expires_at: DateTime<Utc>) -> Result<Uuid>;

    /// The owning user id, iff the session exists and has not expired.
    async fn find_live(&self, session_id: Uuid) -> Result<Option<Uuid>>;

    /// Deletes the session. Unknown ids are a no-op.
    async fn delete(&self, session_id: Uuid) -> Result<()>;

    /// Deletes sessions whose expiry has passed.
    async fn purge_expired(&self) -> Result<u64>;
}

/// The Postgres-backed session table (`auth_sessions`).
pub struct PostgresSessionStore {
    pool: Pool,
}

impl PostgresSessionStore {
    /// Creates a store over the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn create(&self, user_id: Uuid, expires_at: DateTime<Utc>) -> Result<Uuid> {
        let session_id = Uuid::new_v4();
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO auth_sessions (id, user_id, expires_at)
                VALUES ($1, $2, $3)
                "#,
                &[&session_id, &user_id, &expires_at],
            )
            .await?;
        Ok(session_id)
    }

    async fn find_live(&self, session_id: Uuid) -> Result<Option<Uuid>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT user_id
                FROM auth_sessions
                WHERE id = $1 AND expires_at > NOW()
                "#,
                &[&session_id],
            )
            .await?;
        row.map(|r| r.try_get("user_id").map_err(Into::into)).transpose()
    }

    async fn delete(&self, session_id: Uuid) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                DELETE FROM auth_sessions
                WHERE id = $1
                "#,
                &[&session_id],
            )
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let client = self.pool.get().await?;
        let deleted = client
            .execute(
                r#"
                DELETE FROM auth_sessions
                WHERE expires_at < NOW()
                "#,
                &[],
            )
            .await?;
        Ok(deleted)
    }
}
