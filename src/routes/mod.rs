pub mod admin;
pub mod audit;
mod error;
pub mod health;
pub mod me;
pub mod usage;

use axum::{
    Router,
    routing::{get, post},
};
pub use error::ApiError;

use crate::{AppState, middleware, services::Services};

pub(crate) fn get_services(state: &AppState) -> Result<&Services, ApiError> {
    state.services.as_ref().ok_or(ApiError::ServicesRequired)
}

/// Routes under `/api/v1`. Every route requires an access token; the
/// `/admin` subtree additionally requires the admin role.
pub fn api_v1_routes(state: AppState) -> Router<AppState> {
    let admin = admin::admin_routes().route_layer(axum::middleware::from_fn(
        middleware::require_admin_middleware,
    ));

    Router::new()
        // Usage RPC
        .route("/usage/sum/user", post(usage::sum_user))
        .route("/usage/sum/instance", post(usage::sum_instance))
        .route("/usage/sum/global", post(usage::sum_global))
        .route("/usage/group", post(usage::group_count))
        .route("/usage/batch/instances", post(usage::batch_instances))
        .route("/usage/batch/models", post(usage::batch_models))
        .route("/usage/logs", get(usage::logs))
        .route("/usage/charts/instances", get(usage::chart_instances))
        .route("/usage/charts/models", get(usage::chart_models))
        .route("/usage/charts/users", get(usage::chart_users))
        // Self-service
        .route("/me", get(me::get))
        .route("/me/instances", get(me::instances))
        .route(
            "/me/instances/{instance_id}/token",
            post(me::issue_instance_token),
        )
        .nest("/admin", admin)
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::access_token_auth_middleware,
        ))
}

/// Routes called by the instance proxy, authenticated per request by an
/// instance token instead of an access token.
pub fn external_routes() -> Router<AppState> {
    Router::new().route("/audit/{instance_id}", post(audit::ingest))
}
