//! Audit callback endpoint called by instance proxies.
//!
//! Sits outside `/api/v1` and authenticates with instance tokens rather than
//! access tokens.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tower_cookies::Cookies;

use crate::{
    AppState,
    db::DbError,
    middleware::bearer_token,
    observability::metrics,
    openapi::ErrorResponse,
    services::IngestError,
};

/// Header carrying the shared account id.
pub const ACCOUNT_ID_HEADER: &str = "Chatgpt-Account-Id";

/// Cookie carrying the shared account id when the header is absent.
pub const ACCOUNT_COOKIE: &str = "_account";

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            IngestError::BadRequest => (StatusCode::BAD_REQUEST, "invalid_audit_request"),
            IngestError::InvalidToken => (StatusCode::UNAUTHORIZED, "invalid_token"),
            IngestError::InvalidBody(err) => {
                tracing::debug!(error = %err, "Rejected audit body");
                (StatusCode::BAD_REQUEST, "invalid_body")
            }
            IngestError::Internal(err) => {
                tracing::error!(error = %err, "Audit ingestion failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        };

        metrics::record_error(code, status.as_u16());
        if status == StatusCode::UNAUTHORIZED {
            metrics::record_auth_attempt("instance_token", false);
        }

        let body = match status {
            StatusCode::UNAUTHORIZED => {
                ErrorResponse::with_type("authentication_error", code, self.to_string())
            }
            StatusCode::INTERNAL_SERVER_ERROR => {
                ErrorResponse::with_type("server_error", code, self.to_string())
            }
            _ => ErrorResponse::new(code, self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}

/// The shared account id from the header, else the `_account` cookie.
/// Blank values from either source count as absent.
fn account_id(headers: &HeaderMap, cookies: &Cookies) -> Option<String> {
    let header = headers.get(ACCOUNT_ID_HEADER).and_then(|v| v.to_str().ok());
    non_blank(header).or_else(|| {
        let cookie = cookies.get(ACCOUNT_COOKIE)?;
        non_blank(Some(cookie.value()))
    })
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(String::from)
}

/// Record one completion request
#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/api/external/audit/{instance_id}",
    tag = "ingestion",
    operation_id = "audit_ingest",
    params(("instance_id" = String, Path, description = "Instance ID")),
    request_body(content = serde_json::Value, content_type = "application/json", description = "Raw completion request body"),
    responses(
        (status = 200, description = "Event recorded"),
        (status = 400, description = "Missing token or invalid body", body = crate::openapi::ErrorResponse),
        (status = 401, description = "Unknown instance token", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "audit.ingest", skip(state, headers, cookies, body))]
pub async fn ingest(
    State(state): State<AppState>,
    Path(instance_id): Path<String>,
    headers: HeaderMap,
    cookies: Cookies,
    body: Bytes,
) -> Result<StatusCode, IngestError> {
    let services = state
        .services
        .as_ref()
        .ok_or(IngestError::Internal(DbError::NotConfigured))?;

    services
        .ingestion
        .ingest(
            &instance_id,
            bearer_token(&headers),
            account_id(&headers, &cookies),
            &body,
        )
        .await?;

    Ok(StatusCode::OK)
}
