use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use axum_valid::Valid;

use crate::{
    AppState,
    models::{EventLog, EventLogFilter, Page, PageParams},
    routes::{ApiError, get_services},
};

/// List administrative events, newest first
#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/api/v1/admin/event-logs",
    tag = "event_logs",
    operation_id = "event_log_list",
    params(EventLogFilter, PageParams),
    responses(
        (status = 200, description = "Page of events", body = Page<EventLog>),
    )
))]
#[tracing::instrument(name = "admin.event_logs.list", skip(state, filter))]
pub async fn list(
    State(state): State<AppState>,
    Valid(Query(params)): Valid<Query<PageParams>>,
    filter: Result<Query<EventLogFilter>, QueryRejection>,
) -> Result<Json<Page<EventLog>>, ApiError> {
    let Query(filter) = filter?;
    let services = get_services(&state)?;
    Ok(Json(services.event_logs.list(&filter, params).await?))
}
