use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use uuid::Uuid;

use crate::error::Result;

/// Durable revocation table for issued tokens, keyed by token id.
///
/// This is the single source of truth for "is this token still honored",
/// independent of the token's embedded expiry. Reads must be point lookups
/// with read-after-write consistency: a revocation is visible to the next
/// validation, with no stale-read window.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Records a freshly issued token with `revoked = false`.
    async fn insert(&self, token_id: Uuid, subject_id: Uuid, expires_at: DateTime<Utc>)
    -> Result<()>;

    /// True iff a record exists for this id and it is not revoked.
    /// An unknown id is invalid, not an error.
    async fn is_valid(&self, token_id: Uuid) -> Result<bool>;

    /// Marks the token revoked. Idempotent; also flips any refresh rows that
    /// reference this access token so no derived refresh path stays usable.
    /// Refresh rows are written by external issuers sharing the schema; this
    /// crate never inserts them, only revokes and purges them.
    async fn revoke(&self, token_id: Uuid) -> Result<()>;

    /// Deletes records whose embedded expiry has passed. Expired tokens are
    /// already invalid everywhere, so losing the row changes nothing.
    async fn purge_expired(&self) -> Result<u64>;
}

/// The Postgres-backed revocation table (`access_tokens`/`refresh_tokens`).
pub struct PostgresTokenStore {
    pool: Pool,
}

impl PostgresTokenStore {
    /// Creates a store over the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PostgresTokenStore {
    async fn insert(
        &self,
        token_id: Uuid,
        subject_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                INSERT INTO access_tokens (id, user_id, revoked, expires_at)
                VALUES ($1, $2, FALSE, $3)
                "#,
                &[&token_id, &subject_id, &expires_at],
            )
            .await?;
        Ok(())
    }

    async fn is_valid(&self, token_id: Uuid) -> Result<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT revoked
                FROM access_tokens
                WHERE id = $1
                "#,
                &[&token_id],
            )
            .await?;

        match row {
            Some(row) => {
                let revoked: bool = row.try_get("revoked")?;
                Ok(!revoked)
            }
            None => Ok(false),
        }
    }

    async fn revoke(&self, token_id: Uuid) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                r#"
                UPDATE access_tokens
                SET revoked = TRUE
                WHERE id = $1
                "#,
                &[&token_id],
            )
            .await?;
        client
            .execute(
                r#"
                UPDATE refresh_tokens
                SET revoked = TRUE
                WHERE access_token_id = $1
                "#,
                &[&token_id],
            )
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let client = self.pool.get().await?;
        // Refresh rows go with their access token via ON DELETE CASCADE.
        let deleted = client
            .execute(
                r#"
                DELETE FROM access_tokens
                WHERE expires_at < NOW()
                "#,
                &[],
            )
            .await?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::MemoryTokenStore;
    use chrono::Duration;

    #[tokio::test]
    async fn issued_token_is_valid_until_revoked() {
        let store = MemoryTokenStore::new();
        let token_id = Uuid::new_v4();
        let expires = Utc::now() + Duration::minutes(30);

        store.insert(token_id, Uuid::new_v4(), expires).await.unwrap();
        assert!(store.is_valid(token_id).await.unwrap());

        store.revoke(token_id).await.unwrap();
        assert!(!store.is_valid(token_id).await.unwrap());
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let store = MemoryTokenStore::new();
        let token_id = Uuid::new_v4();
        let expires = Utc::now() + Duration::minutes(30);

        store.insert(token_id, Uuid::new_v4(), expires).await.unwrap();
        store.revoke(token_id).await.unwrap();
        store.revoke(token_id).await.unwrap();
        store.revoke(token_id).await.unwrap();
        assert!(!store.is_valid(token_id).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_id_is_invalid() {
        let store = MemoryTokenStore::new();
        assert!(!store.is_valid(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn revoking_unknown_id_is_a_no_op() {
        let store = MemoryTokenStore::new();
        store.revoke(Uuid::new_v4()).await.unwrap();
    }
}
