use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::{observability::metrics, openapi::ErrorResponse};

#[derive(Debug)]
pub enum AuthError {
    /// No `Authorization: Bearer` header
    MissingCredentials,

    /// Token unknown, revoked, malformed, or owned by a deactivated user.
    /// One variant for all of them so callers cannot probe which.
    InvalidCredentials,

    /// Authenticated, but the role or identity does not allow the request
    Forbidden(String),

    /// Internal error during authentication
    Internal(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_type, code, message) = match &self {
            AuthError::MissingCredentials => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "missing_credentials",
                "Authentication credentials required",
            ),
            AuthError::InvalidCredentials => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_credentials",
                "Invalid authentication credentials",
            ),
            AuthError::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                "permission_error",
                "forbidden",
                msg.as_str(),
            ),
            AuthError::Internal(msg) => {
                tracing::error!(error = %msg, "Authentication failed internally");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_error",
                    "internal_error",
                    "Internal server error",
                )
            }
        };

        metrics::record_error(code, status.as_u16());

        let body = ErrorResponse::with_type(error_type, code, message);
        (status, Json(body)).into_response()
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingCredentials => write!(f, "Authentication credentials required"),
            AuthError::InvalidCredentials => write!(f, "Invalid authentication credentials"),
            AuthError::Forbidden(msg) => write!(f, "Access forbidden: {}", msg),
            AuthError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_credentials_is_401() {
        let response = AuthError::MissingCredentials.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_forbidden_is_403() {
        let response = AuthError::Forbidden("nope".into()).into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_internal_hides_detail() {
        let err = AuthError::Internal("pool timed out".into());
        assert!(err.to_string().contains("pool timed out"));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
