use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// The application's error type.
///
/// The token-validity variants (`InvalidCredentials`, `MalformedToken`,
/// `ExpiredToken`, `RevokedToken`, `UnknownSubject`) deliberately collapse to
/// the same caller-visible `401 Unauthenticated` so external callers cannot
/// probe which check failed. A missing token is reported as `MalformedToken`.
/// `UpstreamUnavailable` also fails closed and is distinguished only in logs.
#[derive(Error, Debug)]
pub enum AppError {
    /// A database error.
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A connection pool error.
    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// A pool construction error.
    #[error("Pool build error: {0}")]
    BuildPool(#[from] deadpool_postgres::CreatePoolError),

    /// An I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A login failure. Always generic, never says whether the email exists.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// A token that could not be decoded, or no token at all.
    #[error("Malformed token")]
    MalformedToken,

    /// A token whose `exp` claim is in the past.
    #[error("Expired token")]
    ExpiredToken,

    /// A token whose revocation record is flagged or missing.
    #[error("Revoked token")]
    RevokedToken,

    /// A valid token whose subject no longer exists.
    #[error("Unknown subject")]
    UnknownSubject,

    /// The guard could not reach the authority.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// A validation error.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An internal server error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

/// A `Result` type that uses `AppError` as the error type.
pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Database(ref e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Pool(ref e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::BuildPool(ref e) => {
                tracing::error!("Pool build error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::Io(ref e) => {
                tracing::error!("IO error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }

            AppError::InvalidCredentials => {
                tracing::warn!("Login rejected: invalid credentials");
                (StatusCode::UNAUTHORIZED, "Invalid credentials".to_string())
            }

            AppError::MalformedToken => {
                tracing::warn!("Token rejected: malformed or missing");
                (StatusCode::UNAUTHORIZED, "Unauthenticated".to_string())
            }

            AppError::ExpiredToken => {
                tracing::warn!("Token rejected: expired");
                (StatusCode::UNAUTHORIZED, "Unauthenticated".to_string())
            }

            AppError::RevokedToken => {
                tracing::warn!("Token rejected: revoked or unknown id");
                (StatusCode::UNAUTHORIZED, "Unauthenticated".to_string())
            }

            AppError::UnknownSubject => {
                tracing::warn!("Token rejected: subject no longer exists");
                (StatusCode::UNAUTHORIZED, "Unauthenticated".to_string())
            }

            AppError::UpstreamUnavailable(ref msg) => {
                tracing::error!("Authority unreachable, failing closed: {}", msg);
                (StatusCode::UNAUTHORIZED, "Unauthenticated".to_string())
            }

            AppError::Validation(ref msg) => {
                tracing::debug!("Validation error: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }

            AppError::Internal(ref msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = sonic_rs::to_string(&sonic_rs::json!({
            "message": message
        }))
        .unwrap_or_else(|_| r#"{"message":"Internal server error"}"#.to_string());

        (status, body).into_response()
    }
}
