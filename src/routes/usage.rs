//! Usage aggregation endpoints.
//!
//! Every handler runs behind the access token middleware and applies the
//! per-request access rules before touching the database: users see their
//! own usage, admins see everyone's, and unscoped aggregates are admin only.

use axum::{
    Extension, Json,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
};
use axum_valid::Valid;
use serde::Deserialize;
use uuid::Uuid;

use super::{ApiError, get_services};
use crate::{
    AppState,
    auth::{AuthError, Principal},
    models::{
        DurationWindow, GroupField, InstancePairUsage, ModelPairUsage, Page, PageParams,
        ServiceType, UsageEvent, UsageEventFilter, UsageFilter, UserInstancePair, UserModelPair,
        WindowGroupCounts, WindowSum,
    },
    services::{DEFAULT_CHART_MODELS, DEFAULT_MODEL_PREFIX, Services, UsageMatrix, UserUsageBars},
};

/// Most pairs accepted by one batch request.
pub const MAX_BATCH_PAIRS: usize = 2000;

/// Most models one chart may have as columns.
pub const MAX_CHART_MODELS: usize = 50;

const MAX_MODEL_PREFIX_LEN: usize = 128;

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct SumUserRequest {
    /// Defaults to the caller
    #[serde(default)]
    pub user_id: Option<Uuid>,
    pub duration_windows: Vec<DurationWindow>,
    #[serde(default)]
    pub service_type: Option<ServiceType>,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct SumInstanceRequest {
    pub instance_id: Uuid,
    pub duration_windows: Vec<DurationWindow>,
    #[serde(default)]
    pub service_type: Option<ServiceType>,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct SumGlobalRequest {
    pub duration_windows: Vec<DurationWindow>,
    #[serde(default)]
    pub service_type: Option<ServiceType>,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct GroupCountRequest {
    /// Without an instance the count is global (admin only)
    #[serde(default)]
    pub instance_id: Option<Uuid>,
    pub duration_window: DurationWindow,
    #[serde(default)]
    pub group_by: GroupField,
    /// Defaults to `gpt-4`
    #[serde(default)]
    pub model_prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct InstancePairsRequest {
    pub duration_window: DurationWindow,
    pub pairs: Vec<UserInstancePair>,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct ModelPairsRequest {
    pub duration_window: DurationWindow,
    pub pairs: Vec<UserModelPair>,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "utoipa", into_params(parameter_in = Query))]
pub struct ChartQuery {
    pub duration_window: DurationWindow,
}

#[derive(Debug, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "utoipa", into_params(parameter_in = Query))]
pub struct ModelChartQuery {
    pub duration_window: DurationWindow,
    /// Comma-separated model names; defaults to the common chat models
    #[serde(default)]
    pub models: Option<String>,
}

fn require_windows(windows: &[DurationWindow]) -> Result<(), ApiError> {
    if windows.is_empty() {
        return Err(ApiError::Validation(
            "duration_windows must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn require_batch_size(len: usize) -> Result<(), ApiError> {
    if len > MAX_BATCH_PAIRS {
        return Err(ApiError::Validation(format!(
            "at most {MAX_BATCH_PAIRS} pairs per request, got {len}"
        )));
    }
    Ok(())
}

/// Instance-scoped aggregates are open to any authenticated user unless
/// `auth.restrict_instance_usage` is set, in which case non-admins need
/// `can_use` on the instance.
async fn authorize_instance(
    state: &AppState,
    services: &Services,
    principal: &Principal,
    instance_id: Uuid,
) -> Result<(), ApiError> {
    if services.instances.get_by_id(instance_id).await?.is_none() {
        return Err(ApiError::NotFound(format!(
            "Instance '{instance_id}' not found"
        )));
    }
    if !state.config.auth.restrict_instance_usage || principal.is_admin() {
        return Ok(());
    }
    if services
        .abilities
        .can_use(principal.user_id, instance_id)
        .await?
    {
        Ok(())
    } else {
        Err(AuthError::Forbidden("Cannot access usage of this instance".into()).into())
    }
}

/// Parse the `models` chart parameter.
fn parse_chart_models(raw: Option<&str>) -> Result<Vec<String>, ApiError> {
    let models: Vec<String> = raw
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from)
        .collect();

    if models.is_empty() {
        return Ok(DEFAULT_CHART_MODELS.iter().map(|m| m.to_string()).collect());
    }
    if models.len() > MAX_CHART_MODELS {
        return Err(ApiError::Validation(format!(
            "at most {MAX_CHART_MODELS} models per chart"
        )));
    }
    Ok(models)
}

/// Windowed sums for one user
#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/api/v1/usage/sum/user",
    tag = "usage",
    operation_id = "usage_sum_user",
    request_body = SumUserRequest,
    responses(
        (status = 200, description = "One entry per requested window", body = Vec<WindowSum>),
        (status = 400, description = "Invalid request", body = crate::openapi::ErrorResponse),
        (status = 401, description = "Not authenticated", body = crate::openapi::ErrorResponse),
        (status = 403, description = "Another user's usage", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "usage.sum_user", skip(state, principal, payload))]
pub async fn sum_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<SumUserRequest>, JsonRejection>,
) -> Result<Json<Vec<WindowSum>>, ApiError> {
    let Json(input) = payload?;
    let user_id = principal.scope_user(input.user_id)?;
    require_windows(&input.duration_windows)?;

    let services = get_services(&state)?;
    let sums = services
        .usage
        .sum_windows(
            &input.duration_windows,
            UsageFilter {
                user_id: Some(user_id),
                instance_id: None,
                service_type: input.service_type,
            },
        )
        .await?;
    Ok(Json(sums))
}

/// Windowed sums for one instance, grouped by user
#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/api/v1/usage/sum/instance",
    tag = "usage",
    operation_id = "usage_sum_instance",
    request_body = SumInstanceRequest,
    responses(
        (status = 200, description = "One entry per requested window", body = Vec<WindowSum>),
        (status = 400, description = "Invalid request", body = crate::openapi::ErrorResponse),
        (status = 403, description = "Instance usage is restricted", body = crate::openapi::ErrorResponse),
        (status = 404, description = "Instance not found", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "usage.sum_instance", skip(state, principal, payload))]
pub async fn sum_instance(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<SumInstanceRequest>, JsonRejection>,
) -> Result<Json<Vec<WindowSum>>, ApiError> {
    let Json(input) = payload?;
    require_windows(&input.duration_windows)?;

    let services = get_services(&state)?;
    authorize_instance(&state, services, &principal, input.instance_id).await?;

    let sums = services
        .usage
        .sum_windows(
            &input.duration_windows,
            UsageFilter {
                user_id: None,
                instance_id: Some(input.instance_id),
                service_type: input.service_type,
            },
        )
        .await?;
    Ok(Json(sums))
}

/// Windowed sums across all users and instances
#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/api/v1/usage/sum/global",
    tag = "usage",
    operation_id = "usage_sum_global",
    request_body = SumGlobalRequest,
    responses(
        (status = 200, description = "One entry per requested window", body = Vec<WindowSum>),
        (status = 403, description = "Admin role required", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "usage.sum_global", skip(state, principal, payload))]
pub async fn sum_global(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<SumGlobalRequest>, JsonRejection>,
) -> Result<Json<Vec<WindowSum>>, ApiError> {
    principal.require_admin()?;
    let Json(input) = payload?;
    require_windows(&input.duration_windows)?;

    let services = get_services(&state)?;
    let sums = services
        .usage
        .sum_windows(
            &input.duration_windows,
            UsageFilter {
                service_type: input.service_type,
                ..Default::default()
            },
        )
        .await?;
    Ok(Json(sums))
}

/// Event counts grouped by account or model
#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/api/v1/usage/group",
    tag = "usage",
    operation_id = "usage_group_count",
    request_body = GroupCountRequest,
    responses(
        (status = 200, description = "Counts per group", body = WindowGroupCounts),
        (status = 403, description = "Not allowed for this scope", body = crate::openapi::ErrorResponse),
        (status = 404, description = "Instance not found", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "usage.group_count", skip(state, principal, payload))]
pub async fn group_count(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<GroupCountRequest>, JsonRejection>,
) -> Result<Json<WindowGroupCounts>, ApiError> {
    let Json(input) = payload?;
    let model_prefix = input
        .model_prefix
        .as_deref()
        .unwrap_or(DEFAULT_MODEL_PREFIX);
    if model_prefix.len() > MAX_MODEL_PREFIX_LEN {
        return Err(ApiError::Validation("model_prefix is too long".to_string()));
    }

    let services = get_services(&state)?;
    match input.instance_id {
        Some(instance_id) => {
            authorize_instance(&state, services, &principal, instance_id).await?;
        }
        None => principal.require_admin()?,
    }

    let counts = services
        .usage
        .count_grouped(
            input.duration_window,
            input.instance_id,
            input.group_by,
            model_prefix,
        )
        .await?;
    Ok(Json(counts))
}

/// Sums for explicit (user, instance) pairs
#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/api/v1/usage/batch/instances",
    tag = "usage",
    operation_id = "usage_batch_instances",
    request_body = InstancePairsRequest,
    responses(
        (status = 200, description = "One entry per pair, in request order", body = Vec<InstancePairUsage>),
        (status = 400, description = "Too many pairs", body = crate::openapi::ErrorResponse),
        (status = 403, description = "A pair names another user", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "usage.batch_instances", skip(state, principal, payload))]
pub async fn batch_instances(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<InstancePairsRequest>, JsonRejection>,
) -> Result<Json<Vec<InstancePairUsage>>, ApiError> {
    let Json(input) = payload?;
    require_batch_size(input.pairs.len())?;
    principal.require_users(input.pairs.iter().map(|p| p.user_id))?;

    let services = get_services(&state)?;
    let rows = services
        .usage
        .sum_instance_pairs(input.duration_window, &input.pairs)
        .await?;
    Ok(Json(rows))
}

/// Sums for explicit (user, model) pairs
#[cfg_attr(feature = "utoipa", utoipa::path(
    post,
    path = "/api/v1/usage/batch/models",
    tag = "usage",
    operation_id = "usage_batch_models",
    request_body = ModelPairsRequest,
    responses(
        (status = 200, description = "One entry per pair, in request order", body = Vec<ModelPairUsage>),
        (status = 400, description = "Too many pairs", body = crate::openapi::ErrorResponse),
        (status = 403, description = "A pair names another user", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "usage.batch_models", skip(state, principal, payload))]
pub async fn batch_models(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    payload: Result<Json<ModelPairsRequest>, JsonRejection>,
) -> Result<Json<Vec<ModelPairUsage>>, ApiError> {
    let Json(input) = payload?;
    require_batch_size(input.pairs.len())?;
    principal.require_users(input.pairs.iter().map(|p| p.user_id))?;

    let services = get_services(&state)?;
    let rows = services
        .usage
        .sum_model_pairs(input.duration_window, &input.pairs)
        .await?;
    Ok(Json(rows))
}

/// Raw usage events, newest first
#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/api/v1/usage/logs",
    tag = "usage",
    operation_id = "usage_logs",
    params(UsageEventFilter, PageParams),
    responses(
        (status = 200, description = "Page of events", body = Page<UsageEvent>),
        (status = 403, description = "Another user's events", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "usage.logs", skip(state, principal, filter))]
pub async fn logs(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Valid(Query(params)): Valid<Query<PageParams>>,
    filter: Result<Query<UsageEventFilter>, QueryRejection>,
) -> Result<Json<Page<UsageEvent>>, ApiError> {
    let Query(mut filter) = filter?;
    if !principal.is_admin() {
        filter.user_id = Some(principal.scope_user(filter.user_id)?);
    }

    let services = get_services(&state)?;
    let page = services.usage.list_events(&filter, params).await?;
    Ok(Json(page))
}

/// Users x instances usage matrix
#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/api/v1/usage/charts/instances",
    tag = "usage",
    operation_id = "usage_chart_instances",
    params(ChartQuery),
    responses(
        (status = 200, description = "Dense matrix and stacked series", body = UsageMatrix),
        (status = 403, description = "Admin role required", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "usage.chart_instances", skip(state, principal))]
pub async fn chart_instances(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    query: Result<Query<ChartQuery>, QueryRejection>,
) -> Result<Json<UsageMatrix>, ApiError> {
    principal.require_admin()?;
    let Query(query) = query?;
    let services = get_services(&state)?;
    let matrix = services
        .charts
        .instance_matrix(query.duration_window)
        .await?;
    Ok(Json(matrix))
}

/// Users x models usage matrix
#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/api/v1/usage/charts/models",
    tag = "usage",
    operation_id = "usage_chart_models",
    params(ModelChartQuery),
    responses(
        (status = 200, description = "Dense matrix and stacked series", body = UsageMatrix),
        (status = 403, description = "Admin role required", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "usage.chart_models", skip(state, principal))]
pub async fn chart_models(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    query: Result<Query<ModelChartQuery>, QueryRejection>,
) -> Result<Json<UsageMatrix>, ApiError> {
    principal.require_admin()?;
    let Query(query) = query?;
    let models = parse_chart_models(query.models.as_deref())?;

    let services = get_services(&state)?;
    let matrix = services
        .charts
        .model_matrix(query.duration_window, &models)
        .await?;
    Ok(Json(matrix))
}

/// Per-user totals for one window
#[cfg_attr(feature = "utoipa", utoipa::path(
    get,
    path = "/api/v1/usage/charts/users",
    tag = "usage",
    operation_id = "usage_chart_users",
    params(ChartQuery),
    responses(
        (status = 200, description = "Counts per active user", body = UserUsageBars),
        (status = 403, description = "Admin role required", body = crate::openapi::ErrorResponse),
    )
))]
#[tracing::instrument(name = "usage.chart_users", skip(state, principal))]
pub async fn chart_users(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    query: Result<Query<ChartQuery>, QueryRejection>,
) -> Result<Json<UserUsageBars>, ApiError> {
    principal.require_admin()?;
    let Query(query) = query?;
    let services = get_services(&state)?;
    let bars = services.charts.user_bars(query.duration_window).await?;
    Ok(Json(bars))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chart_models() {
        assert_eq!(parse_chart_models(None).unwrap().len(), DEFAULT_CHART_MODELS.len());
        assert_eq!(parse_chart_models(Some(" , ")).unwrap().len(), 5);
        assert_eq!(
            parse_chart_models(Some("o1, gpt-4o ,")).unwrap(),
            vec!["o1".to_string(), "gpt-4o".to_string()]
        );

        let many = vec!["m"; MAX_CHART_MODELS + 1].join(",");
        assert!(parse_chart_models(Some(&many)).is_err());
    }

    #[test]
    fn test_request_limits() {
        assert!(require_windows(&[]).is_err());
        assert!(require_windows(&[DurationWindow::ThreeHours]).is_ok());
        assert!(require_batch_size(MAX_BATCH_PAIRS).is_ok());
        assert!(require_batch_size(MAX_BATCH_PAIRS + 1).is_err());
    }
}
