//! Cross-service single sign-on: an authority that mints, validates and
//! revokes signed access tokens, plus the guard middleware relying parties
//! use to accept them.

use axum::{
    Router,
    routing::{get, post},
};
use tower_cookies::CookieManagerLayer;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod db;
pub mod error;
pub mod keys;
pub mod state;
pub mod testutil;

pub mod models {
    pub mod user;
}

pub mod token {
    pub mod codec;
    pub mod store;
}

pub mod repositories {
    pub mod session;
    pub mod user;
}

pub mod services {
    pub mod auth;
}

pub mod handlers {
    pub mod auth;
}

pub mod middleware_layer {
    pub mod sso;
}

pub mod validation {
    pub mod auth;
}

use state::AppState;

/// Builds the authority's router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route(
            "/login",
            get(handlers::auth::login_view).post(handlers::auth::login),
        )
        .route("/api/auth/login", post(handlers::auth::login))
        .route("/api/auth/token", get(handlers::auth::token))
        .route("/api/auth/me", get(handlers::auth::me))
        .route("/api/auth/logout", post(handlers::auth::logout))
        .route("/api/auth/public-key", get(handlers::auth::public_key))
        .layer(TraceLayer::new_for_http())
        .layer(CookieManagerLayer::new())
        .with_state(state)
}
