//! Administration endpoints. Mounted under `/api/v1/admin` behind the
//! access token and admin role middleware.

pub mod abilities;
pub mod access_tokens;
pub mod event_logs;
pub mod instances;
pub mod users;

use axum::{
    Router,
    routing::{delete, get, post},
};

use crate::AppState;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // Users
        .route("/users", get(users::list).post(users::create))
        .route("/users/{user_id}", get(users::get).patch(users::update))
        .route("/users/{user_id}/activate", post(users::activate))
        .route("/users/{user_id}/deactivate", post(users::deactivate))
        // Access tokens
        .route(
            "/users/{user_id}/access-tokens",
            get(access_tokens::list).post(access_tokens::issue),
        )
        .route("/access-tokens/{token_id}", delete(access_tokens::revoke))
        // Instances
        .route("/instances", get(instances::list).post(instances::create))
        .route(
            "/instances/{instance_id}",
            get(instances::get)
                .patch(instances::update)
                .delete(instances::delete),
        )
        // Abilities
        .route("/users/{user_id}/abilities", get(abilities::list))
        .route("/abilities", post(abilities::update))
        // Event logs
        .route("/event-logs", get(event_logs::list))
}
