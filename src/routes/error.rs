use axum::{
    Json,
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use validator::ValidationErrors;

use crate::{
    auth::AuthError, db::DbError, observability::metrics, openapi::ErrorResponse,
    services::TokenError,
};

/// Error returned by the `/api/v1` handlers.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Conflict(String),
    Validation(String),
    Auth(AuthError),
    ServicesRequired,
    Database(DbError),
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound => ApiError::NotFound("Resource not found".to_string()),
            DbError::Conflict(msg) => ApiError::Conflict(msg),
            DbError::Validation(msg) => ApiError::Validation(msg),
            DbError::NotConfigured => ApiError::ServicesRequired,
            _ => ApiError::Database(err),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::UserNotFound => ApiError::NotFound("User not found".to_string()),
            TokenError::InstanceNotFound => ApiError::NotFound("Instance not found".to_string()),
            TokenError::NotAllowed => ApiError::Auth(AuthError::Forbidden(err.to_string())),
            TokenError::Db(db_err) => db_err.into(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::Validation(rejection.body_text())
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        ApiError::Validation(errors.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Auth(err) => return err.into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg),
            ApiError::ServicesRequired => (
                StatusCode::SERVICE_UNAVAILABLE,
                "not_configured",
                "This endpoint requires a configured database".to_string(),
            ),
            ApiError::Database(err) => {
                tracing::error!(error = %err, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    "An internal database error occurred".to_string(),
                )
            }
        };

        metrics::record_error(code, status.as_u16());

        let body = match status {
            StatusCode::NOT_FOUND => ErrorResponse::with_type("not_found_error", code, message),
            StatusCode::INTERNAL_SERVER_ERROR | StatusCode::SERVICE_UNAVAILABLE => {
                ErrorResponse::with_type("server_error", code, message)
            }
            _ => ErrorResponse::new(code, message),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;

    async fn body(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_db_errors_map_to_status() {
        assert_eq!(body(DbError::NotFound.into()).await.0, StatusCode::NOT_FOUND);
        assert_eq!(
            body(DbError::Conflict("username taken".into()).into()).await.0,
            StatusCode::CONFLICT
        );
        assert_eq!(
            body(DbError::Validation("bad".into()).into()).await.0,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_internal_error_is_opaque() {
        let (status, json) = body(DbError::Corrupt("users.role = 'x'".into()).into()).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["error"]["type"], "server_error");
        assert!(!json["error"]["message"].as_str().unwrap().contains("users"));
    }

    #[tokio::test]
    async fn test_not_allowed_token_is_forbidden() {
        let (status, json) = body(TokenError::NotAllowed.into()).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(json["error"]["type"], "permission_error");
    }
}
