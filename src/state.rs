use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::keys::KeyMaterial;
use crate::repositories::session::PostgresSessionStore;
use crate::repositories::user::PostgresUserStore;
use crate::services::auth::AuthService;
use crate::token::store::PostgresTokenStore;

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// The application's configuration.
    pub config: Config,
    /// The authority service.
    pub auth: AuthService,
}

impl AppState {
    /// Creates a new `AppState` with Postgres-backed collaborators and key
    /// material loaded from the configured PEM files.
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let pool = crate::db::create_pool(&config.database_url)?;
        tracing::info!("PostgreSQL pool initialized");

        let keys = KeyMaterial::from_files(
            Some(Path::new(&config.private_key_path)),
            Path::new(&config.public_key_path),
        )?;
        tracing::info!("RSA key material loaded");

        let users = Arc::new(PostgresUserStore::new(pool.clone()));
        let auth = AuthService::new(
            users.clone(),
            users,
            Arc::new(PostgresTokenStore::new(pool.clone())),
            Arc::new(PostgresSessionStore::new(pool)),
            Arc::new(keys),
            config.clone(),
        );
        tracing::info!("Authority service initialized");

        Ok(AppState {
            config: config.clone(),
            auth,
        })
    }

    /// Creates an `AppState` from an already-built service. Used by tests to
    /// run the full router over in-memory collaborators.
    pub fn with_service(config: Config, auth: AuthService) -> Self {
        Self { config, auth }
    }
}
