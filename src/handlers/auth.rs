use axum::{
    Json, RequestExt,
    extract::{Form, Query, Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    middleware_layer::sso::{expects_json, extract_token},
    models::user::UserProfile,
    services::auth::{
        TokenDeliveryPlan, expired_session_cookie, expired_sso_cookie, session_cookie,
    },
    state::AppState,
    validation::auth::{validate_email, validate_password},
};

/// The request payload for login, accepted as JSON or as a form post.
#[derive(Deserialize, Debug)]
pub struct LoginRequest {
    /// The login email.
    pub email: String,
    /// The password.
    pub password: String,
    /// "Remember me": extends the server session lifetime.
    #[serde(default)]
    pub remember: Option<RememberFlag>,
    /// Where to send the browser back after authenticating.
    #[serde(default)]
    pub redirect: Option<String>,
}

/// A checkbox-or-boolean flag: forms post `"1"`/`"on"`, JSON posts `true`.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub enum RememberFlag {
    /// A JSON boolean.
    Bool(bool),
    /// A form value.
    Text(String),
    /// A numeric flag.
    Number(i64),
}

impl RememberFlag {
    fn is_set(&self) -> bool {
        match self {
            RememberFlag::Bool(b) => *b,
            RememberFlag::Text(s) => matches!(s.as_str(), "1" | "true" | "on" | "yes"),
            RememberFlag::Number(n) => *n != 0,
        }
    }
}

/// The JSON response for a successful login.
#[derive(Serialize)]
pub struct LoginResponse {
    /// The signed access token.
    pub token: String,
    /// Token expiry, RFC 3339.
    pub expires_at: String,
    /// The authenticated user's public profile.
    pub user: UserProfile,
}

/// The JSON response for `GET /api/auth/token`.
#[derive(Serialize)]
pub struct TokenResponse {
    /// The access token.
    pub token: String,
}

#[derive(Deserialize)]
pub struct LoginViewQuery {
    /// Where to send the browser back after authenticating.
    pub redirect: Option<String>,
}

fn is_json_content(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/json"))
        .unwrap_or(false)
}

fn session_id(cookies: &Cookies, session_cookie_name: &str) -> Option<Uuid> {
    cookies
        .get(session_cookie_name)
        .and_then(|c| Uuid::parse_str(c.value()).ok())
}

/// Handles credential submission (`POST /login`, `POST /api/auth/login`).
pub async fn login(
    State(state): State<AppState>,
    cookies: Cookies,
    req: Request,
) -> Result<Response> {
    let json_body = is_json_content(req.headers());
    let wants_json = expects_json(req.headers()) || json_body;

    let payload: LoginRequest = if json_body {
        let Json(payload) = req
            .extract::<Json<LoginRequest>, _>()
            .await
            .map_err(|_| AppError::Validation("Invalid login payload".to_string()))?;
        payload
    } else {
        let Form(payload) = req
            .extract::<Form<LoginRequest>, _>()
            .await
            .map_err(|_| AppError::Validation("Invalid login payload".to_string()))?;
        payload
    };

    validate_email(&payload.email)?;
    validate_password(&payload.password)?;

    let remember = payload.remember.as_ref().map(RememberFlag::is_set).unwrap_or(false);
    let redirect = payload.redirect.clone().filter(|r| !r.is_empty());

    tracing::info!(email = %payload.email, "Login attempt");

    let login = match state
        .auth
        .attempt_login(&payload.email, &payload.password, remember)
        .await
    {
        Ok(login) => login,
        Err(AppError::InvalidCredentials) if !wants_json => {
            // Re-render the form with a generic error, keeping the redirect
            // so the flow can resume once the user gets the password right.
            return Ok((
                StatusCode::UNAUTHORIZED,
                Html(render_login_page(Some("Invalid credentials"), redirect.as_deref())),
            )
                .into_response());
        }
        Err(e) => return Err(e),
    };

    cookies.add(session_cookie(
        &state.config.session_cookie_name,
        login.session_id,
        login.session_expires_at,
        state.config.cookie.secure,
    ));

    let plan = TokenDeliveryPlan {
        token: login.token.clone(),
        expires_at: Some(login.expires_at),
        redirect,
    };
    cookies.add(plan.cookie(&state.config.cookie));

    if wants_json {
        return Ok(Json(LoginResponse {
            token: login.token,
            expires_at: login.expires_at.to_rfc3339(),
            user: UserProfile::from(&login.user),
        })
        .into_response());
    }

    Ok(Redirect::to(&plan.redirect_target(&state.config.app_url)).into_response())
}

/// Renders the login page (`GET /login`).
///
/// A browser arriving with a live server session gets the silent-mint
/// handshake instead: a fresh token is issued if the presented cookie token
/// is stale, and the browser is redirected back with the token in the URL
/// fragment.
pub async fn login_view(
    State(state): State<AppState>,
    cookies: Cookies,
    Query(query): Query<LoginViewQuery>,
) -> Result<Response> {
    let redirect = query.redirect.filter(|r| !r.is_empty());

    let session_user = match session_id(&cookies, &state.config.session_cookie_name) {
        Some(sid) => state.auth.session_user(sid).await?,
        None => None,
    };

    let Some(user) = session_user else {
        return Ok(Html(render_login_page(None, redirect.as_deref())).into_response());
    };

    if let Some(cookie) = cookies.get(&state.config.cookie.name) {
        let token = cookie.value().to_string();
        if state.auth.validate_and_resolve(&token).await.is_ok() {
            // Cookie token still good: just hand it back via the fragment.
            let plan = TokenDeliveryPlan {
                token,
                expires_at: None,
                redirect,
            };
            return Ok(Redirect::to(&plan.redirect_target(&state.config.app_url)).into_response());
        }
    }

    tracing::info!(user = %user.id, "Silent token mint for live session");
    let issued = state.auth.issue_for_subject(&user).await?;
    let plan = TokenDeliveryPlan {
        token: issued.token,
        expires_at: Some(issued.expires_at),
        redirect,
    };
    cookies.add(plan.cookie(&state.config.cookie));
    Ok(Redirect::to(&plan.redirect_target(&state.config.app_url)).into_response())
}

/// Returns the caller's token (`GET /api/auth/token`), minting one from a
/// live server session when no token was presented.
pub async fn token(
    State(state): State<AppState>,
    cookies: Cookies,
    headers: HeaderMap,
) -> Result<Response> {
    if let Some(token) = extract_token(&cookies, &headers, &state.config.cookie.name) {
        return Ok(Json(TokenResponse { token }).into_response());
    }

    if let Some(sid) = session_id(&cookies, &state.config.session_cookie_name) {
        if let Some(user) = state.auth.session_user(sid).await? {
            let issued = state.auth.issue_for_subject(&user).await?;
            let plan = TokenDeliveryPlan {
                token: issued.token.clone(),
                expires_at: Some(issued.expires_at),
                redirect: None,
            };
            cookies.add(plan.cookie(&state.config.cookie));
            return Ok(Json(TokenResponse { token: issued.token }).into_response());
        }
    }

    Err(AppError::MalformedToken)
}

/// Resolves the caller's identity (`GET /api/auth/me`).
pub async fn me(
    State(state): State<AppState>,
    cookies: Cookies,
    headers: HeaderMap,
) -> Result<Json<UserProfile>> {
    let token = extract_token(&cookies, &headers, &state.config.cookie.name)
        .ok_or(AppError::MalformedToken)?;
    let user = state.auth.validate_and_resolve(&token).await?;
    Ok(Json(UserProfile::from(&user)))
}

/// Revokes the caller's token and tears down the session
/// (`POST /api/auth/logout`).
pub async fn logout(
    State(state): State<AppState>,
    cookies: Cookies,
    headers: HeaderMap,
) -> Result<Response> {
    if let Some(token) = extract_token(&cookies, &headers, &state.config.cookie.name) {
        state.auth.revoke(&token).await?;
    }

    if let Some(sid) = session_id(&cookies, &state.config.session_cookie_name) {
        state.auth.drop_session(sid).await?;
    }

    cookies.add(expired_sso_cookie(&state.config.cookie));
    cookies.add(expired_session_cookie(
        &state.config.session_cookie_name,
        state.config.cookie.secure,
    ));

    if expects_json(&headers) {
        return Ok(Json(sonic_rs::json!({ "message": "Logged out" })).into_response());
    }

    Ok(Redirect::to(&state.config.app_url).into_response())
}

/// Serves the raw public verification key (`GET /api/auth/public-key`).
///
/// Key material cannot be constructed without the public half, so this
/// always has a PEM to serve.
pub async fn public_key(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.auth.public_key_pem().to_string(),
    )
        .into_response()
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn render_login_page(error: Option<&str>, redirect: Option<&str>) -> String {
    let error_block = match error {
        Some(error) => format!(r#"<div class="error">{}</div>"#, escape_html(error)),
        None => String::new(),
    };
    let redirect_value = escape_html(redirect.unwrap_or(""));

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Login</title>
<style>
body{{font-family:system-ui,-apple-system,Segoe UI,Roboto,Ubuntu,Cantarell,Noto Sans,sans-serif;background:#f7fafc;margin:0;padding:0}}
.container{{max-width:420px;margin:5rem auto;background:#fff;border-radius:8px;box-shadow:0 2px 10px rgba(0,0,0,.06);padding:24px}}
.input{{width:100%;padding:10px 12px;margin:8px 0;border:1px solid #e2e8f0;border-radius:6px}}
.button{{width:100%;padding:10px 12px;margin-top:12px;background:#2563eb;color:#fff;border:none;border-radius:6px;cursor:pointer}}
.error{{color:#b91c1c;background:#fee2e2;border:1px solid #fecaca;padding:8px 10px;border-radius:6px;margin-bottom:8px}}
</style>
</head>
<body>
<div class="container">
<h2>Login</h2>
{error_block}
<form method="POST" action="/login">
<input type="hidden" name="redirect" value="{redirect_value}">
<input class="input" type="email" name="email" placeholder="Email" required>
<input class="input" type="password" name="password" placeholder="Password" required>
<label style="display:flex;align-items:center;gap:8px;margin-top:8px">
<input type="checkbox" name="remember" value="1"> Remember me
</label>
<button class="button" type="submit">Sign in</button>
</form>
</div>
</body>
</html>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remember_flag_parses_form_and_json_shapes() {
        assert!(RememberFlag::Bool(true).is_set());
        assert!(!RememberFlag::Bool(false).is_set());
        assert!(RememberFlag::Text("1".to_string()).is_set());
        assert!(RememberFlag::Text("on".to_string()).is_set());
        assert!(!RememberFlag::Text("0".to_string()).is_set());
        assert!(RememberFlag::Number(1).is_set());
        assert!(!RememberFlag::Number(0).is_set());
    }

    #[test]
    fn login_page_escapes_interpolated_values() {
        let page = render_login_page(Some("<b>err</b>"), Some("https://x/?a=1&b=\"2\""));
        assert!(page.contains("&lt;b&gt;err&lt;/b&gt;"));
        assert!(page.contains("https://x/?a=1&amp;b=&quot;2&quot;"));
        assert!(!page.contains("<b>err</b>"));
    }

    #[test]
    fn login_page_keeps_redirect_field() {
        let page = render_login_page(None, Some("https://app.example.com/home"));
        assert!(page.contains(r#"name="redirect" value="https://app.example.com/home""#));
        assert!(!page.contains("class=\"error\""));
    }
}
