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
    models::{CreateInstance, NewEventLog, ServiceInstance, UpdateInstance, event_types},
    routes::{ApiError, get_services},
};

/// Create an instance
#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/api/v1/admin/instances",
    tag = "instances",
    operation_id = "instance_create",
    request_body = CreateInstance,
    responses(
        (status = 201, description = "Instance created", body = ServiceInstance),
        (status = 409, description = "Name already exists", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "admin.instances.create", skip(state, principal, payload))]
pub async fn create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<CreateInstance>, JsonRejection>,
) -> Result<(StatusCode, Json<ServiceInstance>), ApiError> {
    let Json(input) = payload?;
    input.validate()?;

    let services = get_services(&state)?;
    let instance = services.instances.create(input).await?;

    services
        .event_logs
        .record(NewEventLog::new(
            event_types::INSTANCE_CREATE,
            Some(principal.user_id),
            json!({
                "instance_id": instance.id,
                "name": instance.name,
                "service_type": instance.service_type,
                "url": instance.url,
            }),
        ))
        .await;

    Ok((StatusCode::CREATED, Json(instance)))
}

/// List instances, sorted by name
#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/api/v1/admin/instances",
    tag = "instances",
    operation_id = "instance_list",
    responses(
        (status = 200, description = "All instances", body = Vec<ServiceInstance>),
    )
))]
#[tracing::instrument(name = "admin.instances.list", skip(state))]
pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<ServiceInstance>>, ApiError> {
    let services = get_services(&state)?;
    Ok(Json(services.instances.list().await?))
}

/// Get an instance by ID
#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/api/v1/admin/instances/{instance_id}",
    tag = "instances",
    operation_id = "instance_get",
    params(("instance_id" = Uuid, Path, description = "Instance ID")),
    responses(
        (status = 200, description = "Instance found", body = ServiceInstance),
        (status = 404, description = "Instance not found", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "admin.instances.get", skip(state), fields(%instance_id))]
pub async fn get(
    State(state): State<AppState>,
    Path(instance_id): Path<Uuid>,
) -> Result<Json<ServiceInstance>, ApiError> {
    let services = get_services(&state)?;
    let instance = services
        .instances
        .get_by_id(instance_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Instance '{}' not found", instance_id)))?;
    Ok(Json(instance))
}

/// Rename an instance or change its URL
#[cfg_attr(feature = "utoipa", utoipa::path(
    patch,
    path = "/api/v1/admin/instances/{instance_id}",
    tag = "instances",
    operation_id = "instance_update",
    params(("instance_id" = Uuid, Path, description = "Instance ID")),
    request_body = UpdateInstance,
    responses(
        (status = 200, description = "Instance updated", body = ServiceInstance),
        (status = 404, description = "Instance not found", body = crate::openapi::ErrorResponse),
        (status = 409, description = "Name already exists", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "admin.instances.update", skip(state, principal, payload), fields(%instance_id))]
pub async fn update(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(instance_id): Path<Uuid>,
    payload: Result<Json<UpdateInstance>, JsonRejection>,
) -> Result<Json<ServiceInstance>, ApiError> {
    let Json(input) = payload?;
    input.validate()?;

    let services = get_services(&state)?;
    let changes = json!({ "name": input.name, "url": input.url });
    let instance = services.instances.update(instance_id, input).await?;

    services
        .event_logs
        .record(NewEventLog::new(
            event_types::INSTANCE_UPDATE,
            Some(principal.user_id),
            json!({ "instance_id": instance.id, "changes": changes }),
        ))
        .await;

    Ok(Json(instance))
}

/// Delete an instance
///
/// Abilities and instance tokens for it are removed. Recorded usage is kept.
#[cfg_attr(feature = "utoipa", utoipa::path(
    delete,
    path = "/api/v1/admin/instances/{instance_id}",
    tag = "instances",
    operation_id = "instance_delete",
    params(("instance_id" = Uuid, Path, description = "Instance ID")),
    responses(
        (status = 204, description = "Instance deleted"),
        (status = 404, description = "Instance not found", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "admin.instances.delete", skip(state, principal), fields(%instance_id))]
pub async fn delete(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(instance_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let services = get_services(&state)?;
    services.instances.delete(instance_id).await?;

    services
        .event_logs
        .record(NewEventLog::new(
            event_types::INSTANCE_DELETE,
            Some(principal.user_id),
            json!({ "instance_id": instance_id }),
        ))
        .await;

    Ok(StatusCode::NO_CONTENT)
}
