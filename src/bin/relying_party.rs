//! A minimal relying party: every protected route sits behind the SSO guard,
//! which delegates token validation to the authority over HTTP.

use axum::{Extension, Json, Router, middleware::from_fn_with_state, routing::get};
use tower_cookies::CookieManagerLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ssogate::middleware_layer::sso::{GuardConfig, SsoGuard, sso_authenticate};
use ssogate::models::user::UserProfile;

async fn me(Extension(user): Extension<UserProfile>) -> Json<UserProfile> {
    Json(user)
}

async fn ping() -> Json<sonic_rs::Value> {
    Json(sonic_rs::json!({ "ok": true }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = GuardConfig::from_env()?;
    let guard = SsoGuard::new(config.clone())?;
    tracing::info!(
        service = %config.service,
        authority = %config.auth_base_url,
        "✅ SSO guard configured"
    );

    let app = Router::new()
        .route("/api/sso/me", get(me))
        .route("/api/protected/ping", get(ping))
        .route_layer(from_fn_with_state(guard, sso_authenticate))
        .layer(TraceLayer::new_for_http())
        .layer(CookieManagerLayer::new());

    let addr =
        std::env::var("RP_LISTEN_ADDR").unwrap_or_else(|_| "127.0.0.1:8003".to_string());
    tracing::info!("🚀 Relying party listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
