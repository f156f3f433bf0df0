use std::env;

use anyhow::{Context, Result};
use tower_cookies::cookie::SameSite;

/// Attributes of the cross-domain SSO cookie.
///
/// Deployment configuration, not per-request state. `SameSite=None` is the
/// default because the fragment handoff is a cross-site flow.
#[derive(Clone, Debug)]
pub struct CookieConfig {
    /// The cookie name.
    pub name: String,
    /// The cookie domain, when shared across subdomains.
    pub domain: Option<String>,
    /// The `SameSite` attribute.
    pub same_site: SameSite,
    /// Whether the cookie is `Secure`.
    pub secure: bool,
}

/// The application's configuration.
#[derive(Clone)]
pub struct Config {
    /// The URL of the PostgreSQL database.
    pub database_url: String,
    /// The externally visible base URL of the authority.
    pub app_url: String,
    /// The address the authority listens on.
    pub listen_addr: String,
    /// SSO cookie attributes.
    pub cookie: CookieConfig,
    /// Name of the authority-local session cookie.
    pub session_cookie_name: String,
    /// Access token lifetime in minutes.
    pub token_ttl_minutes: i64,
    /// Server session lifetime in minutes.
    pub session_ttl_minutes: i64,
    /// Server session lifetime in minutes when "remember me" is checked.
    pub remember_ttl_minutes: i64,
    /// Path to the RSA private signing key (PEM).
    pub private_key_path: String,
    /// Path to the RSA public verification key (PEM).
    pub public_key_path: String,
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_same_site(value: &str) -> Result<SameSite> {
    match value.to_ascii_lowercase().as_str() {
        "none" => Ok(SameSite::None),
        "lax" => Ok(SameSite::Lax),
        "strict" => Ok(SameSite::Strict),
        other => anyhow::bail!("Invalid SSO_COOKIE_SAMESITE: {}", other),
    }
}

impl Config {
    /// Creates a new `Config` from environment variables.
    pub fn from_env() -> Result<Self> {
        let cookie = CookieConfig {
            name: env_or("SSO_COOKIE_NAME", "sso_token"),
            domain: env::var("SSO_COOKIE_DOMAIN").ok().filter(|d| !d.is_empty()),
            same_site: parse_same_site(&env_or("SSO_COOKIE_SAMESITE", "None"))?,
            secure: env_or("SSO_COOKIE_SECURE", "false")
                .parse()
                .context("SSO_COOKIE_SECURE must be true or false")?,
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            app_url: env_or("APP_URL", "http://localhost:8001"),
            listen_addr: env_or("LISTEN_ADDR", "127.0.0.1:8001"),
            cookie,
            session_cookie_name: env_or("SSO_SESSION_COOKIE_NAME", "sso_session"),
            token_ttl_minutes: env_or("TOKEN_TTL_MINUTES", "1440")
                .parse()
                .context("Invalid TOKEN_TTL_MINUTES")?,
            session_ttl_minutes: env_or("SESSION_TTL_MINUTES", "720")
                .parse()
                .context("Invalid SESSION_TTL_MINUTES")?,
            remember_ttl_minutes: env_or("REMEMBER_TTL_MINUTES", "43200")
                .parse()
                .context("Invalid REMEMBER_TTL_MINUTES")?,
            private_key_path: env_or("SSO_PRIVATE_KEY_PATH", "storage/oauth-private.key"),
            public_key_path: env_or("SSO_PUBLIC_KEY_PATH", "storage/oauth-public.key"),
        })
    }
}
