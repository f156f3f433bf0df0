use argon2::{
    Argon2, ParamsBuilder,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use rand::{RngCore, rngs::OsRng};
use tokio_postgres::Row;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::{
    error::{AppError, Result},
    models::user::User,
};

/// The memory cost for Argon2 in MB.
const ARGON2_MEMORY_MB: u32 = 19;
/// The number of iterations for Argon2.
const ARGON2_ITERATIONS: u32 = 3;
/// The parallelism factor for Argon2.
const ARGON2_PARALLELISM: u32 = 4;

/// Verifies an email/password pair against the user directory.
///
/// Returns `Ok(None)` for unknown email and wrong password alike; the caller
/// must not be able to tell the two apart.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Resolves the user iff the credentials match an active account.
    async fn verify_credentials(&self, email: &str, password: &str) -> Result<Option<User>>;
}

/// Looks up a subject's record by id.
#[async_trait]
pub trait SubjectRepository: Send + Sync {
    /// The subject, or `None` when the id no longer resolves.
    async fn find_subject(&self, id: Uuid) -> Result<Option<User>>;
}

/// Hashes a password using Argon2id.
pub fn hash_password(password: &str) -> Result<String> {
    let mut password_bytes = password.as_bytes().to_vec();

    let mut salt_bytes = [0u8; 16];
    OsRng.fill_bytes(&mut salt_bytes);

    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::Internal(format!("Salt encoding error: {}", e)))?;

    let argon2 = Argon2::new(
        argon2::Algorithm::Argon2id,
        argon2::Version::V0x13,
        ParamsBuilder::new()
            .m_cost(ARGON2_MEMORY_MB * 1024)
            .t_cost(ARGON2_ITERATIONS)
            .p_cost(ARGON2_PARALLELISM)
            .build()
            .map_err(|e| AppError::Internal(format!("Argon2 params: {}", e)))?,
    );

    let password_hash = argon2
        .hash_password(&password_bytes, &salt)
        .map_err(|e| AppError::Internal(format!("Argon2 hash error: {}", e)))?
        .to_string();

    password_bytes.zeroize();
    Ok(password_hash)
}

/// Verifies a password against a stored Argon2 hash.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let mut password_bytes = password.as_bytes().to_vec();
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| AppError::Internal(format!("Hash parse error: {}", e)))?;
    let result = Argon2::default()
        .verify_password(&password_bytes, &parsed_hash)
        .is_ok();

    password_bytes.zeroize();
    Ok(result)
}

fn row_to_user(row: &Row) -> Result<User> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        password: row.try_get("password")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// The Postgres-backed user directory.
pub struct PostgresUserStore {
    pool: Pool,
}

impl PostgresUserStore {
    /// Creates a store over the given pool.
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT id, name, email, password, is_active, created_at, updated_at
                FROM users
                WHERE email = $1 AND is_active = TRUE
                "#,
                &[&email],
            )
            .await?;
        row.map(|r| row_to_user(&r)).transpose()
    }
}

#[async_trait]
impl CredentialVerifier for PostgresUserStore {
    async fn verify_credentials(&self, email: &str, password: &str) -> Result<Option<User>> {
        let Some(user) = self.find_by_email(email).await? else {
            return Ok(None);
        };

        if !verify_password(password, &user.password)? {
            return Ok(None);
        }

        Ok(Some(user))
    }
}

#[async_trait]
impl SubjectRepository for PostgresUserStore {
    async fn find_subject(&self, id: Uuid) -> Result<Option<User>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(
                r#"
                SELECT id, name, email, password, is_active, created_at, updated_at
                FROM users
                WHERE id = $1
                "#,
                &[&id],
            )
            .await?;
        row.map(|r| row_to_user(&r)).transpose()
    }
}
