use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use axum_valid::Valid;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::{
    AppState,
    auth::Principal,
    models::{CreateUser, NewEventLog, Page, PageParams, UpdateUser, User, event_types},
    routes::{ApiError, get_services},
    services::Services,
};

/// Create a user
#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/api/v1/admin/users",
    tag = "users",
    operation_id = "user_create",
    request_body = CreateUser,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 403, description = "Admin role required", body = crate::openapi::ErrorResponse),
        (status = 409, description = "Username already exists", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "admin.users.create", skip(state, principal, payload))]
pub async fn create(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<CreateUser>, JsonRejection>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let Json(input) = payload?;
    input.validate()?;

    let services = get_services(&state)?;
    let user = services.users.create(input).await?;

    services
        .event_logs
        .record(NewEventLog::new(
            event_types::USER_CREATE,
            Some(principal.user_id),
            json!({
                "user_id": user.id,
                "username": user.username,
                "role": user.role,
            }),
        ))
        .await;

    Ok((StatusCode::CREATED, Json(user)))
}

/// Get a user by ID
#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/api/v1/admin/users/{user_id}",
    tag = "users",
    operation_id = "user_get",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User found", body = User),
        (status = 404, description = "User not found", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "admin.users.get", skip(state), fields(%user_id))]
pub async fn get(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<User>, ApiError> {
    let services = get_services(&state)?;
    let user = services
        .users
        .get_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User '{}' not found", user_id)))?;
    Ok(Json(user))
}

/// List users, oldest first
#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/api/v1/admin/users",
    tag = "users",
    operation_id = "user_list",
    params(PageParams),
    responses(
        (status = 200, description = "Page of users", body = Page<User>),
    )
))]
#[tracing::instrument(name = "admin.users.list", skip(state))]
pub async fn list(
    State(state): State<AppState>,
    Valid(Query(params)): Valid<Query<PageParams>>,
) -> Result<Json<Page<User>>, ApiError> {
    let services = get_services(&state)?;
    Ok(Json(services.users.list(params).await?))
}

/// Update a user
#[cfg_attr(feature = "utoipa", utoipa::path(
    patch,
    path = "/api/v1/admin/users/{user_id}",
    tag = "users",
    operation_id = "user_update",
    params(("user_id" = Uuid, Path, description = "User ID")),
    request_body = UpdateUser,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 404, description = "User not found", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "admin.users.update", skip(state, principal, payload), fields(%user_id))]
pub async fn update(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<Uuid>,
    payload: Result<Json<UpdateUser>, JsonRejection>,
) -> Result<Json<User>, ApiError> {
    let Json(input) = payload?;
    input.validate()?;

    let services = get_services(&state)?;
    let changes = json!({
        "name": input.name,
        "email": input.email,
        "role": input.role,
        "is_active": input.is_active,
        "comment": input.comment,
    });
    let user = services.users.update(user_id, input).await?;

    record_update(services, &principal, user.id, changes).await;
    Ok(Json(user))
}

/// Activate a user
#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/api/v1/admin/users/{user_id}/activate",
    tag = "users",
    operation_id = "user_activate",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User activated", body = User),
        (status = 404, description = "User not found", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "admin.users.activate", skip(state, principal), fields(%user_id))]
pub async fn activate(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<User>, ApiError> {
    set_active(&state, &principal, user_id, true).await
}

/// Deactivate a user
///
/// The user's access tokens stop authenticating immediately. Admins cannot
/// deactivate themselves.
#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/api/v1/admin/users/{user_id}/deactivate",
    tag = "users",
    operation_id = "user_deactivate",
    params(("user_id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User deactivated", body = User),
        (status = 400, description = "Cannot deactivate yourself", body = crate::openapi::ErrorResponse),
        (status = 404, description = "User not found", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "admin.users.deactivate", skip(state, principal), fields(%user_id))]
pub async fn deactivate(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<User>, ApiError> {
    if user_id == principal.user_id {
        return Err(ApiError::Validation(
            "Cannot deactivate your own account".to_string(),
        ));
    }
    set_active(&state, &principal, user_id, false).await
}

async fn set_active(
    state: &AppState,
    principal: &Principal,
    user_id: Uuid,
    is_active: bool,
) -> Result<Json<User>, ApiError> {
    let services = get_services(state)?;
    let user = services.users.set_active(user_id, is_active).await?;
    record_update(services, principal, user.id, json!({ "is_active": is_active })).await;
    Ok(Json(user))
}

async fn record_update(
    services: &Services,
    principal: &Principal,
    user_id: Uuid,
    changes: serde_json::Value,
) {
    services
        .event_logs
        .record(NewEventLog::new(
            event_types::USER_UPDATE,
            Some(principal.user_id),
            json!({ "user_id": user_id, "changes": changes }),
        ))
        .await;
}
