use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no token provided")]
    MissingToken,
    #[error("token has expired")]
    Expired,
    #[error("invalid token")]
    Invalid,
    #[error("required role missing or revoked")]
    RoleRevoked,
    #[error(transparent)]
    Upstream(#[from] anyhow::Error),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::MissingToken => (StatusCode::UNAUTHORIZED, "No token provided".to_string()),
            Self::Expired => (StatusCode::UNAUTHORIZED, "Token has expired".to_string()),
            Self::Invalid => (StatusCode::UNAUTHORIZED, "Invalid token".to_string()),
            Self::RoleRevoked => (
                StatusCode::FORBIDDEN,
                "User does not have the required role or is not a member of the guild".to_string(),
            ),
            Self::Upstream(err) => {
                tracing::warn!("upstream failure during session validation: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}
