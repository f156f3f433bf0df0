use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tower_cookies::Cookie;
use tower_cookies::cookie::SameSite;
use tower_cookies::cookie::time::Duration as CookieDuration;
use uuid::Uuid;

use crate::{
    config::{Config, CookieConfig},
    error::{AppError, Result},
    keys::KeyMaterial,
    models::user::User,
    repositories::session::SessionStore,
    repositories::user::{CredentialVerifier, SubjectRepository},
    token::codec,
    token::store::TokenStore,
};

/// Cookie lifetime when the token expiry is unknown (24 hours).
const DEFAULT_COOKIE_MINUTES: i64 = 60 * 24;
/// Cookie lifetime floor, so clock skew never yields a dead-on-arrival cookie.
const MIN_COOKIE_MINUTES: i64 = 5;
/// Lifetime of the cookie-expiring tombstone sent on logout.
const FORGET_MINUTES: i64 = -60;

/// A freshly minted access token.
pub struct IssuedToken {
    /// The token id (`jti`), keying the revocation record.
    pub id: Uuid,
    /// The signed three-part token string.
    pub token: String,
    /// When the token expires.
    pub expires_at: DateTime<Utc>,
}

/// The outcome of a successful login.
pub struct LoginSuccess {
    /// The signed access token.
    pub token: String,
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
    /// The authenticated user.
    pub user: User,
    /// The authority-local session id.
    pub session_id: Uuid,
    /// When the server session expires.
    pub session_expires_at: DateTime<Utc>,
}

/// The two-channel handoff of a minted token: a cookie for the same-site
/// callback and a URL fragment for cross-site pickup by client script.
///
/// Both the `Set-Cookie` writer and the redirect builder consume this one
/// value, so the cookie floor rule and the fragment rule live in one place.
pub struct TokenDeliveryPlan {
    /// The signed token being delivered.
    pub token: String,
    /// The token expiry driving the cookie lifetime, when known.
    pub expires_at: Option<DateTime<Utc>>,
    /// The caller-supplied return URL, when the flow should redirect.
    pub redirect: Option<String>,
}

impl TokenDeliveryPlan {
    /// Cookie lifetime in minutes: minutes until expiry floored at
    /// [`MIN_COOKIE_MINUTES`], or [`DEFAULT_COOKIE_MINUTES`] when the expiry
    /// is unknown.
    pub fn cookie_minutes(&self) -> i64 {
        match self.expires_at {
            Some(expires_at) => (expires_at - Utc::now()).num_minutes().max(MIN_COOKIE_MINUTES),
            None => DEFAULT_COOKIE_MINUTES,
        }
    }

    /// Builds the SSO cookie carrying the raw token.
    pub fn cookie(&self, cfg: &CookieConfig) -> Cookie<'static> {
        let mut cookie = Cookie::new(cfg.name.clone(), self.token.clone());
        cookie.set_http_only(true);
        cookie.set_secure(cfg.secure);
        cookie.set_same_site(cfg.same_site);
        cookie.set_path("/");
        if let Some(domain) = &cfg.domain {
            cookie.set_domain(domain.clone());
        }
        cookie.set_max_age(CookieDuration::minutes(self.cookie_minutes()));
        cookie
    }

    /// The redirect target with the token in the URL fragment.
    ///
    /// Fragments are never sent to servers, which keeps the token out of
    /// server logs and Referer headers during the handoff. A target already
    /// carrying a fragment gets `&token=...` appended instead of a second
    /// `#`. Without a caller-supplied redirect the fallback is returned
    /// untouched, with no token in the URL.
    pub fn redirect_target(&self, fallback: &str) -> String {
        let Some(redirect) = &self.redirect else {
            return fallback.to_string();
        };

        let mut target = redirect.clone();
        let encoded = urlencoding::encode(&self.token);
        if target.contains('#') {
            target.push_str(&format!("&token={}", encoded));
        } else {
            target.push_str(&format!("#token={}", encoded));
        }
        target
    }
}

/// Builds a cookie that expires the SSO cookie on the client.
pub fn expired_sso_cookie(cfg: &CookieConfig) -> Cookie<'static> {
    let mut cookie = Cookie::new(cfg.name.clone(), String::new());
    cookie.set_http_only(true);
    cookie.set_secure(cfg.secure);
    cookie.set_same_site(cfg.same_site);
    cookie.set_path("/");
    if let Some(domain) = &cfg.domain {
        cookie.set_domain(domain.clone());
    }
    cookie.set_max_age(CookieDuration::minutes(FORGET_MINUTES));
    cookie
}

/// Builds the host-only session cookie for the authority's own login.
pub fn session_cookie(
    name: &str,
    session_id: Uuid,
    expires_at: DateTime<Utc>,
    secure: bool,
) -> Cookie<'static> {
    let mut cookie = Cookie::new(name.to_string(), session_id.to_string());
    cookie.set_http_only(true);
    cookie.set_secure(secure);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_path("/");
    let minutes = (expires_at - Utc::now()).num_minutes().max(MIN_COOKIE_MINUTES);
    cookie.set_max_age(CookieDuration::minutes(minutes));
    cookie
}

/// Builds a cookie that expires the session cookie on the client.
pub fn expired_session_cookie(name: &str, secure: bool) -> Cookie<'static> {
    let mut cookie = Cookie::new(name.to_string(), String::new());
    cookie.set_http_only(true);
    cookie.set_secure(secure);
    cookie.set_same_site(SameSite::Lax);
    cookie.set_path("/");
    cookie.set_max_age(CookieDuration::minutes(FORGET_MINUTES));
    cookie
}

/// The authority service: credential verification, token minting, validation
/// and revocation, over injectable collaborators.
#[derive(Clone)]
pub struct AuthService {
    credentials: Arc<dyn CredentialVerifier>,
    subjects: Arc<dyn SubjectRepository>,
    tokens: Arc<dyn TokenStore>,
    sessions: Arc<dyn SessionStore>,
    keys: Arc<KeyMaterial>,
    config: Config,
}

impl AuthService {
    /// Creates the service from its collaborators.
    pub fn new(
        credentials: Arc<dyn CredentialVerifier>,
        subjects: Arc<dyn SubjectRepository>,
        tokens: Arc<dyn TokenStore>,
        sessions: Arc<dyn SessionStore>,
        keys: Arc<KeyMaterial>,
        config: Config,
    ) -> Self {
        Self {
            credentials,
            subjects,
            tokens,
            sessions,
            keys,
            config,
        }
    }

    /// The raw public verification key PEM.
    pub fn public_key_pem(&self) -> &str {
        self.keys.public_pem()
    }

    /// Verifies credentials and, on success, issues a token and a server
    /// session. Failure is always the generic `InvalidCredentials`.
    pub async fn attempt_login(
        &self,
        email: &str,
        password: &str,
        remember: bool,
    ) -> Result<LoginSuccess> {
        let user = self
            .credentials
            .verify_credentials(email, password)
            .await?
            .ok_or(AppError::InvalidCredentials)?;

        let issued = self.issue_for_subject(&user).await?;

        let session_minutes = if remember {
            self.config.remember_ttl_minutes
        } else {
            self.config.session_ttl_minutes
        };
        let session_expires_at = Utc::now() + Duration::minutes(session_minutes);
        let session_id = self.sessions.create(user.id, session_expires_at).await?;

        tracing::info!(user = %user.id, "Login succeeded, token and session issued");

        Ok(LoginSuccess {
            token: issued.token,
            expires_at: issued.expires_at,
            user,
            session_id,
            session_expires_at,
        })
    }

    /// Mints a signed token for the subject, creating its revocation record
    /// first so the record exists from the moment the token does.
    pub async fn issue_for_subject(&self, user: &User) -> Result<IssuedToken> {
        let token_id = Uuid::new_v4();
        let issued_at = Utc::now();
        let expires_at = issued_at + Duration::minutes(self.config.token_ttl_minutes);

        self.tokens.insert(token_id, user.id, expires_at).await?;
        let token = codec::mint(user.id, token_id, issued_at, expires_at, self.keys.encoding()?)?;

        tracing::debug!(user = %user.id, jti = %token_id, "Access token minted");

        Ok(IssuedToken {
            id: token_id,
            token,
            expires_at,
        })
    }

    /// Validates a token end to end and resolves its subject.
    ///
    /// Signature and expiry are verified before any claim is trusted, then
    /// the revocation record is checked, then the subject is looked up. Any
    /// failing step short-circuits; decoded-but-unverified claims are never
    /// enough to get here.
    pub async fn validate_and_resolve(&self, token: &str) -> Result<User> {
        let claims = codec::verify(token, self.keys.decoding())?;

        let token_id = Uuid::parse_str(&claims.jti).map_err(|_| AppError::MalformedToken)?;
        let subject_id = Uuid::parse_str(&claims.sub).map_err(|_| AppError::MalformedToken)?;

        if !self.tokens.is_valid(token_id).await? {
            return Err(AppError::RevokedToken);
        }

        let user = self
            .subjects
            .find_subject(subject_id)
            .await?
            .ok_or(AppError::UnknownSubject)?;

        if !user.is_active {
            return Err(AppError::UnknownSubject);
        }

        Ok(user)
    }

    /// Revokes a token by its `jti`.
    ///
    /// The claims are decoded leniently: a malformed or expired token is a
    /// no-op, not an error. This is the one sanctioned use of unverified
    /// claims, and it can only ever invalidate.
    pub async fn revoke(&self, token: &str) -> Result<()> {
        let Some(claims) = codec::decode_claims(token) else {
            return Ok(());
        };
        let Some(jti) = claims.jti else {
            return Ok(());
        };
        let Ok(token_id) = Uuid::parse_str(&jti) else {
            return Ok(());
        };

        self.tokens.revoke(token_id).await?;
        tracing::info!(jti = %token_id, "Access token revoked");
        Ok(())
    }

    /// Resolves the user behind a live server session, if any.
    pub async fn session_user(&self, session_id: Uuid) -> Result<Option<User>> {
        let Some(user_id) = self.sessions.find_live(session_id).await? else {
            return Ok(None);
        };
        self.subjects.find_subject(user_id).await
    }

    /// Deletes a server session.
    pub async fn drop_session(&self, session_id: Uuid) -> Result<()> {
        self.sessions.delete(session_id).await
    }

    /// Deletes expired token records and sessions. Returns (tokens, sessions)
    /// counts for the cleanup job's log line.
    pub async fn purge_expired(&self) -> Result<(u64, u64)> {
        let tokens = self.tokens.purge_expired().await?;
        let sessions = self.sessions.purge_expired().await?;
        Ok((tokens, sessions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn cookie_lifetime_floors_at_five_minutes() {
        let plan = TokenDeliveryPlan {
            token: "t".to_string(),
            expires_at: Some(Utc::now() + Duration::minutes(2)),
            redirect: None,
        };
        assert_eq!(plan.cookie_minutes(), 5);

        let past = TokenDeliveryPlan {
            token: "t".to_string(),
            expires_at: Some(Utc::now() - Duration::minutes(10)),
            redirect: None,
        };
        assert_eq!(past.cookie_minutes(), 5);
    }

    #[test]
    fn cookie_lifetime_defaults_to_a_day_without_expiry() {
        let plan = TokenDeliveryPlan {
            token: "t".to_string(),
            expires_at: None,
            redirect: None,
        };
        assert_eq!(plan.cookie_minutes(), 1440);
    }

    #[test]
    fn redirect_target_uses_fragment_for_plain_urls() {
        let plan = TokenDeliveryPlan {
            token: "abc/def".to_string(),
            expires_at: None,
            redirect: Some("https://app.example.com/home".to_string()),
        };
        assert_eq!(
            plan.redirect_target("https://auth.example.com"),
            "https://app.example.com/home#token=abc%2Fdef"
        );
    }

    #[test]
    fn redirect_target_appends_when_fragment_already_present() {
        let plan = TokenDeliveryPlan {
            token: "abc".to_string(),
            expires_at: None,
            redirect: Some("https://app.example.com/home#section".to_string()),
        };
        assert_eq!(
            plan.redirect_target("https://auth.example.com"),
            "https://app.example.com/home#section&token=abc"
        );
    }

    #[test]
    fn redirect_target_falls_back_without_redirect() {
        let plan = TokenDeliveryPlan {
            token: "abc".to_string(),
            expires_at: None,
            redirect: None,
        };
        assert_eq!(
            plan.redirect_target("https://auth.example.com"),
            "https://auth.example.com"
        );
    }

    #[tokio::test]
    async fn attempt_login_rejects_wrong_password() {
        let (service, _backend) = testutil::test_service();
        let result = service
            .attempt_login(testutil::DEFAULT_EMAIL, "wrong-password", false)
            .await;
        assert!(matches!(result, Err(AppError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn attempt_login_rejects_unknown_email() {
        let (service, _backend) = testutil::test_service();
        let result = service
            .attempt_login("nobody@example.com", testutil::DEFAULT_PASSWORD, false)
            .await;
        assert!(matches!(result, Err(AppError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn login_token_resolves_back_to_the_user() {
        let (service, backend) = testutil::test_service();
        let login = service
            .attempt_login(testutil::DEFAULT_EMAIL, testutil::DEFAULT_PASSWORD, false)
            .await
            .unwrap();

        assert!(login.expires_at > Utc::now());
        let resolved = service.validate_and_resolve(&login.token).await.unwrap();
        assert_eq!(resolved.id, backend.user.id);
    }

    #[tokio::test]
    async fn revoked_token_no_longer_resolves() {
        let (service, _backend) = testutil::test_service();
        let login = service
            .attempt_login(testutil::DEFAULT_EMAIL, testutil::DEFAULT_PASSWORD, false)
            .await
            .unwrap();

        service.revoke(&login.token).await.unwrap();
        assert!(matches!(
            service.validate_and_resolve(&login.token).await,
            Err(AppError::RevokedToken)
        ));

        // Repeated revocation stays a no-op.
        service.revoke(&login.token).await.unwrap();
    }

    #[tokio::test]
    async fn expired_claim_is_rejected_even_with_a_live_record() {
        let (service, backend) = testutil::test_service();
        let keys = testutil::test_keys();

        let token_id = Uuid::new_v4();
        let now = Utc::now();
        backend
            .tokens
            .insert(token_id, backend.user.id, now + Duration::minutes(30))
            .await
            .unwrap();
        let token = codec::mint(
            backend.user.id,
            token_id,
            now - Duration::minutes(60),
            now - Duration::minutes(1),
            keys.encoding().unwrap(),
        )
        .unwrap();

        assert!(matches!(
            service.validate_and_resolve(&token).await,
            Err(AppError::ExpiredToken)
        ));
    }

    #[tokio::test]
    async fn token_for_vanished_subject_is_rejected() {
        let (service, backend) = testutil::test_service();
        let keys = testutil::test_keys();

        let ghost = Uuid::new_v4();
        let token_id = Uuid::new_v4();
        let now = Utc::now();
        backend
            .tokens
            .insert(token_id, ghost, now + Duration::minutes(30))
            .await
            .unwrap();
        let token = codec::mint(
            ghost,
            token_id,
            now,
            now + Duration::minutes(30),
            keys.encoding().unwrap(),
        )
        .unwrap();

        assert!(matches!(
            service.validate_and_resolve(&token).await,
            Err(AppError::UnknownSubject)
        ));
    }

    #[tokio::test]
    async fn revoking_garbage_is_a_no_op() {
        let (service, _backend) = testutil::test_service();
        service.revoke("not-a-token").await.unwrap();
        service.revoke("a.b.c").await.unwrap();
        service.revoke("").await.unwrap();
    }
}
