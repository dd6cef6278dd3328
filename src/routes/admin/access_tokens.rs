use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    AppState,
    auth::Principal,
    models::{AccessToken, CreateAccessToken, CreatedAccessToken, NewEventLog, event_types},
    routes::{ApiError, get_services},
};

/// Issue an access token for a user
///
/// The raw token is only returned in this response.
#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/api/v1/admin/users/{user_id}/access-tokens",
    tag = "access_tokens",
    operation_id = "access_token_issue",
    params(("user_id" = Uuid, Path, description = "User ID")),
    request_body = CreateAccessToken,
    responses(
        (status = 201, description = "Token issued", body = CreatedAccessToken),
        (status = 404, description = "User not found", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "admin.access_tokens.issue", skip(state, principal, payload), fields(%user_id))]
pub async fn issue(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<Uuid>,
    payload: Result<Json<CreateAccessToken>, JsonRejection>,
) -> Result<(StatusCode, Json<CreatedAccessToken>), ApiError> {
    let Json(input) = payload?;
    input.validate()?;

    let services = get_services(&state)?;
    let created = services.tokens.issue_access_token(user_id, &input).await?;

    services
        .event_logs
        .record(NewEventLog::new(
            event_types::ACCESS_TOKEN_ISSUE,
            Some(principal.user_id),
            json!({
                "user_id": user_id,
                "token_id": created.access_token.id,
                "name": created.access_token.name,
            }),
        ))
        .await;

    Ok((StatusCode::CREATED, Json(created)))
}

/// List a user's access tokens, revoked ones included
#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/api/v1/admin/users/{user_id}/access-tokens",
    tag = "access_tokens",
    operation_id = "access_token_list",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Tokens without secrets", body = Vec<AccessToken>),
        (status = 404, description = "User not found", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "admin.access_tokens.list", skip(state), fields(%user_id))]
pub async fn list(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<AccessToken>>, ApiError> {
    let services = get_services(&state)?;
    if services.users.get_by_id(user_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("User '{}' not found", user_id)));
    }
    Ok(Json(services.tokens.list_access_tokens(user_id).await?))
}

/// Revoke an access token
#[cfg_attr(feature = "utoipa", utoipa::path(
    delete,
    path = "/api/v1/admin/access-tokens/{token_id}",
    tag = "access_tokens",
    operation_id = "access_token_revoke",
    params(("token_id" = Uuid, Path, description = "Access token ID")),
    responses(
        (status = 200, description = "Token revoked", body = AccessToken),
        (status = 404, description = "Token not found", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "admin.access_tokens.revoke", skip(state, principal), fields(%token_id))]
pub async fn revoke(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(token_id): Path<Uuid>,
) -> Result<Json<AccessToken>, ApiError> {
    let services = get_services(&state)?;
    let token = services.tokens.revoke_access_token(token_id).await?;

    services
        .event_logs
        .record(NewEventLog::new(
            event_types::ACCESS_TOKEN_REVOKE,
            Some(principal.user_id),
            json!({ "user_id": token.user_id, "token_id": token.id }),
        ))
        .await;

    Ok(Json(token))
}
