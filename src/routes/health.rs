//! Probes and the Prometheus scrape endpoint.
//!
//! Every sharegate API route needs the database, so readiness means "the
//! database answers", and a process started without one is never ready.

use std::time::Instant;

use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use http::{StatusCode, header};
use serde::Serialize;

use crate::{AppState, observability::metrics::render};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Database reachable, API mounted
    Ok,
    /// No database configured; only probes and docs are served
    Degraded,
    /// Database configured but not answering
    Unavailable,
}

#[derive(Debug, Serialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct HealthReport {
    pub status: HealthState,
    #[cfg_attr(feature = "utoipa", schema(example = "0.1.0"))]
    pub version: String,
    /// `null` when running without a database
    pub database: Option<DatabaseHealth>,
    /// Whether `/api/external/audit/{instance_id}` accepts events
    pub ingestion: bool,
}

#[derive(Debug, Serialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct DatabaseHealth {
    #[cfg_attr(feature = "utoipa", schema(example = "sqlite"))]
    pub backend: String,
    pub reachable: bool,
    pub latency_ms: u64,
}

async fn check_database(state: &AppState) -> Option<DatabaseHealth> {
    let db = state.db.as_ref()?;
    let start = Instant::now();
    let result = db.health_check().await;
    let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    if let Err(e) = &result {
        tracing::warn!(backend = db.backend(), error = %e, "Database health check failed");
    }

    Some(DatabaseHealth {
        backend: db.backend().to_string(),
        reachable: result.is_ok(),
        latency_ms,
    })
}

/// Service health with database status
#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/health",
    tag = "health",
    operation_id = "health_check",
    responses(
        (status = 200, description = "Serving, possibly without a database", body = HealthReport),
        (status = 503, description = "Database not answering", body = HealthReport),
    )
))]
#[tracing::instrument(name = "health.check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = check_database(&state).await;
    let status = match &database {
        None => HealthState::Degraded,
        Some(db) if db.reachable => HealthState::Ok,
        Some(_) => HealthState::Unavailable,
    };
    let code = if status == HealthState::Unavailable {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let report = HealthReport {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        database,
        ingestion: state.services.is_some() && state.config.ingestion.enabled,
    };
    (code, Json(report))
}

/// Liveness probe
#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/health/live",
    tag = "health",
    operation_id = "health_liveness",
    responses((status = 200, description = "Process is serving requests"))
))]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe.
///
/// 200 once the database answers a ping. 503 while it doesn't, and always
/// 503 without a database since the API is not mounted then.
#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    operation_id = "health_readiness",
    responses(
        (status = 200, description = "Ready for API traffic"),
        (status = 503, description = "No database, or the database is not answering"),
    )
))]
#[tracing::instrument(name = "health.readiness", skip(state))]
pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    match check_database(&state).await {
        Some(db) if db.reachable => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Prometheus exposition text, or 503 until the recorder is installed.
pub async fn metrics() -> Response {
    match render() {
        Some(text) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            text,
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Metrics recorder not installed").into_response(),
    }
}

#[cfg(all(test, feature = "database-sqlite"))]
mod tests {
    use std::sync::Arc;

    use axum::{Router, body::Body};
    use http::Request;
    use serde_json::Value;
    use tokio_util::task::TaskTracker;
    use tower::ServiceExt;

    use super::*;
    use crate::{config::AppConfig, db::DbPool};

    const SQLITE: &str = r#"
[database]
type = "sqlite"
path = "sqlite::memory:"
wal_mode = false
max_connections = 1
"#;

    async fn app(config: &str) -> Router {
        let config = AppConfig::from_str(config).expect("test config");
        let state = crate::AppState::new(config.clone())
            .await
            .expect("app state");
        crate::build_app(&config, state)
    }

    async fn get(app: &Router, uri: &str) -> (StatusCode, String) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// State backed by a pool that has already been closed.
    async fn closed_pool_state() -> crate::AppState {
        let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
        let db = DbPool::from_sqlite(pool.clone());
        pool.close().await;

        crate::AppState {
            config: Arc::new(AppConfig::from_str("").unwrap()),
            db: Some(Arc::new(db)),
            services: None,
            task_tracker: TaskTracker::new(),
        }
    }

    #[tokio::test]
    async fn test_health_reports_usage_database() {
        let app = app(SQLITE).await;

        let (status, body) = get(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["database"]["backend"], "sqlite");
        assert_eq!(body["database"]["reachable"], true);
        assert_eq!(body["ingestion"], true);

        assert_eq!(get(&app, "/health/ready").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_without_database_is_degraded_and_not_ready() {
        let app = app("").await;

        let (status, body) = get(&app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["status"], "degraded");
        assert!(body["database"].is_null());
        assert_eq!(body["ingestion"], false);

        assert_eq!(get(&app, "/health/live").await.0, StatusCode::OK);
        assert_eq!(get(&app, "/health/ready").await.0, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_ingestion_flag_follows_config() {
        let app = app(&format!("{SQLITE}\n[ingestion]\nenabled = false\n")).await;

        let (_, body) = get(&app, "/health").await;
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["ingestion"], false);
    }

    #[tokio::test]
    async fn test_unreachable_database() {
        let state = closed_pool_state().await;

        assert_eq!(readiness(State(state.clone())).await, StatusCode::SERVICE_UNAVAILABLE);

        let response = health_check(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "unavailable");
        assert_eq!(body["database"]["reachable"], false);
    }

    #[tokio::test]
    async fn test_metrics_path_without_recorder() {
        let custom = app("[observability.metrics.prometheus]\npath = \"/internal/metrics\"").await;

        let (status, body) = get(&custom, "/internal/metrics").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("not installed"));
        assert_eq!(get(&custom, "/metrics").await.0, StatusCode::NOT_FOUND);

        let disabled = app("[observability.metrics]\nenabled = false").await;
        assert_eq!(get(&disabled, "/metrics").await.0, StatusCode::NOT_FOUND);
    }
}
