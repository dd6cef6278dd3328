//! Self-service endpoints for the authenticated user.

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde_json::json;
use uuid::Uuid;

use super::{ApiError, get_services};
use crate::{
    AppState,
    auth::Principal,
    models::{IssuedInstanceToken, NewEventLog, User, UserInstance, event_types},
};

/// Get the caller's profile
#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/api/v1/me",
    tag = "me",
    operation_id = "me_get",
    responses(
        (status = 200, description = "The caller", body = User),
        (status = 401, description = "Not authenticated", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "me.get", skip(state, principal))]
pub async fn get(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<User>, ApiError> {
    let services = get_services(&state)?;
    let user = services
        .users
        .get_by_id(principal.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    Ok(Json(user))
}

/// List instances with the caller's access to each
#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/api/v1/me/instances",
    tag = "me",
    operation_id = "me_instances",
    responses(
        (status = 200, description = "All instances, sorted by name", body = Vec<UserInstance>),
    )
))]
#[tracing::instrument(name = "me.instances", skip(state, principal))]
pub async fn instances(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<UserInstance>>, ApiError> {
    let services = get_services(&state)?;
    let instances = services.instances.list_for_user(principal.user_id).await?;
    Ok(Json(instances))
}

/// Issue or rotate the caller's token for an instance
///
/// The raw token is only returned here. Issuing again invalidates the
/// previous token.
#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/api/v1/me/instances/{instance_id}/token",
    tag = "me",
    operation_id = "me_issue_instance_token",
    params(("instance_id" = Uuid, Path, description = "Instance ID")),
    responses(
        (status = 201, description = "Token issued", body = IssuedInstanceToken),
        (status = 403, description = "Caller may not use this instance", body = crate::openapi::ErrorResponse),
        (status = 404, description = "Instance not found", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "me.issue_instance_token", skip(state, principal), fields(%instance_id))]
pub async fn issue_instance_token(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(instance_id): Path<Uuid>,
) -> Result<(StatusCode, Json<IssuedInstanceToken>), ApiError> {
    let services = get_services(&state)?;
    let issued = services
        .tokens
        .issue_instance_token(principal.user_id, instance_id)
        .await?;

    services
        .event_logs
        .record(NewEventLog::new(
            event_types::INSTANCE_TOKEN_ISSUE,
            Some(principal.user_id),
            json!({
                "instance_id": instance_id,
                "token_prefix": issued.instance_token.token_prefix,
            }),
        ))
        .await;

    Ok((StatusCode::CREATED, Json(issued)))
}
