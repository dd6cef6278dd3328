//! sharegate: usage tracking and access control for shared chat accounts.
//!
//! The crate is a library so the router can be driven in tests; the
//! `sharegate` binary adds the CLI and socket handling.

use std::{sync::Arc, time::Duration};

#[cfg(feature = "utoipa")]
use axum::Json;
use axum::{Router, routing::get};
use tokio_util::task::TaskTracker;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};
#[cfg(feature = "utoipa")]
use utoipa_scalar::{Scalar, Servable};

pub mod auth;
pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod openapi;
pub mod routes;
pub mod services;

#[cfg(test)]
mod tests;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::AppConfig>,
    pub db: Option<Arc<db::DbPool>>,
    pub services: Option<services::Services>,
    /// Task tracker for background writes (login touches, token last use).
    /// Graceful shutdown waits on it.
    pub task_tracker: TaskTracker,
}

impl AppState {
    pub async fn new(config: config::AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        #[allow(unreachable_patterns)]
        let (db, services) = match &config.database {
            config::DatabaseConfig::None => {
                tracing::warn!("No database configured; only health endpoints are served");
                (None, None)
            }
            _ => {
                let pool = db::DbPool::from_config(&config.database).await?;
                if config.database.run_migrations() {
                    pool.run_migrations().await?;
                }
                let db = Arc::new(pool);
                let services = services::Services::new(db.clone(), config.ingestion.clone());

                if let Some(bootstrap) = &config.auth.bootstrap {
                    let created = services
                        .users
                        .ensure_bootstrap_admin(bootstrap)
                        .await
                        .map_err(|e| format!("Failed to bootstrap admin user: {}", e))?;
                    if let Some(token) = created {
                        tracing::info!(
                            username = %bootstrap.username,
                            token_prefix = %token.token_prefix,
                            "Bootstrap admin created"
                        );
                    }
                }

                (Some(db), Some(services))
            }
        };

        Ok(Self {
            config: Arc::new(config),
            db,
            services,
            task_tracker: TaskTracker::new(),
        })
    }
}

/// Assemble the full router: health, docs, metrics, the API and ingestion,
/// wrapped in request ID, metrics, cookie, CORS, trace, timeout and body
/// limit layers.
pub fn build_app(config: &config::AppConfig, state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/health/live", get(routes::health::liveness))
        .route("/health/ready", get(routes::health::readiness));

    // OpenAPI spec and Scalar docs UI (optional)
    #[cfg(feature = "utoipa")]
    {
        app = app
            .route("/openapi.json", get(openapi_json))
            .merge(Scalar::with_url("/api/docs", openapi::ApiDoc::build()));
    }

    if config.observability.metrics.enabled {
        app = app.route(
            config.observability.metrics.endpoint_path(),
            get(routes::health::metrics),
        );
    }

    // The API needs the database for every route
    if state.services.is_some() {
        app = app.nest("/api/v1", routes::api_v1_routes(state.clone()));

        if config.ingestion.enabled {
            app = app.nest("/api/external", routes::external_routes());
        } else {
            tracing::info!("Audit ingestion disabled");
        }
    }

    app = app
        .layer(axum::middleware::from_fn(
            middleware::http_metrics_middleware,
        ))
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(tower_cookies::CookieManagerLayer::new());

    // Apply CORS layer if enabled (layers are applied in reverse order, so this runs first)
    if let Some(cors_layer) = config.server.cors.clone().into_layer() {
        app = app.layer(cors_layer);
    }

    app.layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.server.timeout_secs,
        )))
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .with_state(state)
}

/// Returns the OpenAPI spec as JSON
#[cfg(feature = "utoipa")]
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi::ApiDoc::build())
}
