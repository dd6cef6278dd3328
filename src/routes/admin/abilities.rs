use axum::{
    Extension, Json,
    extract::{Path, State, rejection::JsonRejection},
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    AppState,
    auth::Principal,
    models::{InstanceAbility, NewEventLog, UpdateInstanceUseStatus, event_types},
    routes::{ApiError, get_services},
};

/// List a user's instance abilities
#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/api/v1/admin/users/{user_id}/abilities",
    tag = "abilities",
    operation_id = "ability_list",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "Stored abilities", body = Vec<InstanceAbility>),
        (status = 404, description = "User not found", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "admin.abilities.list", skip(state), fields(%user_id))]
pub async fn list(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<InstanceAbility>>, ApiError> {
    let services = get_services(&state)?;
    if services.users.get_by_id(user_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("User '{}' not found", user_id)));
    }
    Ok(Json(services.abilities.list_for_user(user_id).await?))
}

/// Allow or disallow a user on a set of instances
///
/// Disallowing also deletes the user's instance tokens for those instances.
#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/api/v1/admin/abilities",
    tag = "abilities",
    operation_id = "ability_update",
    request_body = UpdateInstanceUseStatus,
    responses(
        (status = 200, description = "Abilities after the update", body = Vec<InstanceAbility>),
        (status = 400, description = "Unknown instance or empty list", body = crate::openapi::ErrorResponse),
        (status = 404, description = "User not found", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "admin.abilities.update", skip(state, principal, payload))]
pub async fn update(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<UpdateInstanceUseStatus>, JsonRejection>,
) -> Result<Json<Vec<InstanceAbility>>, ApiError> {
    let Json(input) = payload?;
    input.validate()?;

    let services = get_services(&state)?;
    let update = services.abilities.update(&input).await?;

    services
        .event_logs
        .record(NewEventLog::new(
            event_types::ABILITY_UPDATE,
            Some(principal.user_id),
            json!({
                "user_id": input.user_id,
                "instance_ids": input.instance_ids,
                "can_use": input.can_use,
                "tokens_revoked": update.tokens_revoked,
            }),
        ))
        .await;

    Ok(Json(update.abilities))
}
