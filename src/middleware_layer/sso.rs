use std::time::Duration;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use tower_cookies::Cookies;

use crate::{error::AppError, models::user::UserProfile, state::AppState};

/// Whether the caller wants a machine-readable response.
pub fn expects_json(headers: &http::HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("json"))
        .unwrap_or(false)
}

/// Extracts a bearer token from the `Authorization` header.
pub fn bearer_token(headers: &http::HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.trim().to_string())
}

/// Extracts the candidate token: cookie first, bearer header second.
pub fn extract_token(
    cookies: &Cookies,
    headers: &http::HeaderMap,
    cookie_name: &str,
) -> Option<String> {
    cookies
        .get(cookie_name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| bearer_token(headers))
}

/// Reconstructs the full request URL for redirect back-pointers.
fn full_url(req: &Request<Body>) -> String {
    let scheme = req
        .headers()
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("{}://{}{}", scheme, host, req.uri())
}

/// The rejection shared by both guards: `401` for JSON callers, otherwise a
/// redirect to the authority login with a `redirect` back-pointer so the
/// handshake can resume the original request.
fn reject(req: &Request<Body>, auth_base_url: &str) -> Response {
    if expects_json(req.headers()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(sonic_rs::json!({ "message": "Unauthenticated" })),
        )
            .into_response();
    }

    let redirect = urlencoding::encode(&full_url(req)).into_owned();
    let login_url = format!(
        "{}/login?redirect={}",
        auth_base_url.trim_end_matches('/'),
        redirect
    );
    Redirect::to(&login_url).into_response()
}

/// The in-process guard: validates the token against the local authority
/// service (signature, expiry, revocation record, subject lookup) and
/// attaches the resolved profile to the request.
pub async fn require_sso(
    State(state): State<AppState>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let url = full_url(&request);

    let Some(token) = extract_token(&cookies, request.headers(), &state.config.cookie.name) else {
        tracing::info!(url = %url, "sso.auth.missing_token");
        return reject(&request, &state.config.app_url);
    };

    tracing::debug!(url = %url, "sso.auth.validate.start");

    match state.auth.validate_and_resolve(&token).await {
        Ok(user) => {
            tracing::info!(url = %url, user = %user.id, "sso.auth.validate.success");
            request.extensions_mut().insert(UserProfile::from(&user));
            next.run(request).await
        }
        Err(AppError::Database(_)) | Err(AppError::Pool(_)) => {
            // Store unreachable: fail closed, never open.
            tracing::error!(url = %url, "sso.auth.validate.failed: store unavailable");
            reject(&request, &state.config.app_url)
        }
        Err(e) => {
            tracing::info!(url = %url, reason = %e, "sso.auth.validate.failed");
            reject(&request, &state.config.app_url)
        }
    }
}

/// Configuration for a relying party's remote guard.
#[derive(Clone, Debug)]
pub struct GuardConfig {
    /// Name of the relying party, for audit logs.
    pub service: String,
    /// Base URL of the authority.
    pub auth_base_url: String,
    /// Name of the SSO cookie.
    pub cookie_name: String,
    /// Timeout for validation calls to the authority.
    pub validate_timeout: Duration,
}

impl GuardConfig {
    /// Creates a new `GuardConfig` from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        use anyhow::Context;

        let timeout_secs: u64 = std::env::var("SSO_VALIDATE_TIMEOUT_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .context("Invalid SSO_VALIDATE_TIMEOUT_SECS")?;

        Ok(Self {
            service: std::env::var("SSO_SERVICE_NAME")
                .unwrap_or_else(|_| "relying-party".to_string()),
            auth_base_url: std::env::var("SSO_AUTH_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            cookie_name: std::env::var("SSO_COOKIE_NAME")
                .unwrap_or_else(|_| "sso_token".to_string()),
            validate_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// The relying-party guard: delegates validation to the authority over HTTP.
///
/// Any failure to reach the authority, including timeouts, is treated as
/// unauthenticated. The raw token is never logged.
#[derive(Clone)]
pub struct SsoGuard {
    config: GuardConfig,
    client: reqwest::Client,
}

impl SsoGuard {
    /// Builds the guard and its HTTP client.
    pub fn new(config: GuardConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.validate_timeout)
            .build()?;
        Ok(Self { config, client })
    }

    async fn validate(&self, token: &str) -> Result<UserProfile, AppError> {
        let url = format!(
            "{}/api/auth/me",
            self.config.auth_base_url.trim_end_matches('/')
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppError::RevokedToken);
        }

        response
            .json::<UserProfile>()
            .await
            .map_err(|e| AppError::UpstreamUnavailable(e.to_string()))
    }
}

/// The guard middleware for relying-party routes.
pub async fn sso_authenticate(
    State(guard): State<SsoGuard>,
    cookies: Cookies,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let service = guard.config.service.as_str();
    let url = full_url(&request);

    let Some(token) = extract_token(&cookies, request.headers(), &guard.config.cookie_name) else {
        tracing::info!(service = %service, url = %url, "sso.auth.missing_token");
        return reject(&request, &guard.config.auth_base_url);
    };

    tracing::info!(service = %service, url = %url, "sso.auth.validate.start");

    match guard.validate(&token).await {
        Ok(user) => {
            tracing::info!(service = %service, url = %url, user = %user.id, "sso.auth.validate.success");
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(AppError::UpstreamUnavailable(reason)) => {
            tracing::error!(service = %service, url = %url, reason = %reason, "sso.auth.validate.failed: authority unreachable, failing closed");
            reject(&request, &guard.config.auth_base_url)
        }
        Err(_) => {
            tracing::info!(service = %service, url = %url, "sso.auth.validate.failed");
            reject(&request, &guard.config.auth_base_url)
        }
    }
}
