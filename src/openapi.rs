use serde::{Deserialize, Serialize};
#[cfg(feature = "utoipa")]
use utoipa::OpenApi;

#[cfg(feature = "utoipa")]
use crate::{
    models,
    routes::{admin, audit, health, me, usage},
    services,
};

#[cfg(feature = "utoipa")]
/// OpenAPI documentation for sharegate
#[derive(OpenApi)]
#[openapi(
    info(
        title = "sharegate API",
        version = "0.1.0",
        description = r#"**sharegate** tracks usage of shared chat accounts and controls which users may reach which account instance.

## API surfaces

- **Usage** (`/api/v1/usage/*`) - windowed sums, grouped counts, batched pair lookups, the event log and chart data.
- **Self-service** (`/api/v1/me/*`) - the caller's profile, instances and instance tokens.
- **Administration** (`/api/v1/admin/*`) - users, access tokens, instances, abilities and the event log. Requires the `admin` role.
- **Ingestion** (`/api/external/audit/{instance_id}`) - called by the instance proxy for every completion request, authenticated with an instance token.

## Authentication

All `/api/v1` routes take an access token:

```
Authorization: Bearer sg_...
```

The ingestion route takes the user's instance token (`sgi_...`) in the same header.

## Errors

Every error body has the same shape:

```json
{"error": {"type": "invalid_request_error", "message": "...", "param": null, "code": "validation_error", "request_id": "..."}}
```
"#,
        license(name = "Apache-2.0 OR MIT"),
    ),
    servers(
        (url = "/", description = "Current server")
    ),
    tags(
        (name = "health", description = "Health checks"),
        (name = "usage", description = "Usage aggregation"),
        (name = "me", description = "Self-service"),
        (name = "users", description = "User administration"),
        (name = "access_tokens", description = "Access token administration"),
        (name = "instances", description = "Instance administration"),
        (name = "abilities", description = "Per-user instance access"),
        (name = "event_logs", description = "Administrative event log"),
        (name = "ingestion", description = "Usage ingestion from the instance proxy"),
    ),
    paths(
        // Health
        health::health_check,
        health::liveness,
        health::readiness,
        // Usage
        usage::sum_user,
        usage::sum_instance,
        usage::sum_global,
        usage::group_count,
        usage::batch_instances,
        usage::batch_models,
        usage::logs,
        usage::chart_instances,
        usage::chart_models,
        usage::chart_users,
        // Self-service
        me::get,
        me::instances,
        me::issue_instance_token,
        // Users
        admin::users::create,
        admin::users::list,
        admin::users::get,
        admin::users::update,
        admin::users::activate,
        admin::users::deactivate,
        // Access tokens
        admin::access_tokens::issue,
        admin::access_tokens::list,
        admin::access_tokens::revoke,
        // Instances
        admin::instances::create,
        admin::instances::list,
        admin::instances::get,
        admin::instances::update,
        admin::instances::delete,
        // Abilities
        admin::abilities::list,
        admin::abilities::update,
        // Event logs
        admin::event_logs::list,
        // Ingestion
        audit::ingest,
    ),
    components(schemas(
        // Users and tokens
        models::Role,
        models::User,
        models::CreateUser,
        models::UpdateUser,
        models::AccessToken,
        models::CreateAccessToken,
        models::CreatedAccessToken,
        models::InstanceToken,
        models::IssuedInstanceToken,
        // Instances
        models::ServiceType,
        models::ServiceInstance,
        models::CreateInstance,
        models::UpdateInstance,
        models::UserInstance,
        models::InstanceAbility,
        models::UpdateInstanceUseStatus,
        // Usage
        models::DurationWindow,
        models::UsageEvent,
        models::UsageStats,
        models::UserUsageStats,
        models::WindowSum,
        models::GroupField,
        models::GroupCount,
        models::WindowGroupCounts,
        models::UserInstancePair,
        models::UserModelPair,
        models::InstancePairUsage,
        models::ModelPairUsage,
        usage::SumUserRequest,
        usage::SumInstanceRequest,
        usage::SumGlobalRequest,
        usage::GroupCountRequest,
        usage::InstancePairsRequest,
        usage::ModelPairsRequest,
        // Charts
        services::ChartRow,
        services::ChartSeries,
        services::UsageMatrix,
        services::UserUsageBars,
        // Event log
        models::EventLog,
        // Error response
        ErrorResponse,
        ErrorInfo,
        // Health check types
        health::HealthReport,
        health::HealthState,
        health::DatabaseHealth,
    )),
    security(
        ("access_token" = [])
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

#[cfg(feature = "utoipa")]
impl ApiDoc {
    pub fn build() -> utoipa::openapi::OpenApi {
        Self::openapi()
    }
}

/// Standard error response body
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct ErrorResponse {
    /// Error information
    pub error: ErrorInfo,
}

/// Error information.
///
/// Format: `{"error": {"type": "...", "message": "...", "param": ..., "code": ...}}`
#[derive(Debug, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct ErrorInfo {
    /// Error type classification (e.g., "invalid_request_error", "authentication_error")
    #[cfg_attr(feature = "utoipa", schema(example = "invalid_request_error"))]
    #[serde(rename = "type")]
    pub error_type: String,
    /// Human-readable error message
    #[cfg_attr(feature = "utoipa", schema(example = "duration_windows must not be empty"))]
    pub message: String,
    /// Parameter that caused the error (null if not applicable)
    #[cfg_attr(feature = "utoipa", schema(example = json!(null)))]
    pub param: Option<String>,
    /// Machine-readable error code (null if not applicable)
    #[cfg_attr(feature = "utoipa", schema(example = "validation_error"))]
    pub code: Option<String>,
    /// Request ID for correlating errors with logs. Filled in by the
    /// request ID middleware.
    #[cfg_attr(
        feature = "utoipa",
        schema(example = "550e8400-e29b-41d4-a716-446655440000")
    )]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ErrorResponse {
    /// Create an error response with the "invalid_request_error" type.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_type("invalid_request_error", code, message)
    }

    /// Create an error response with an explicit error type.
    ///
    /// Types in use:
    /// - "invalid_request_error" - invalid parameters or malformed request
    /// - "authentication_error" - missing or unknown token
    /// - "permission_error" - valid token but lacking permissions
    /// - "not_found_error" - resource not found
    /// - "server_error" - internal failure
    pub fn with_type(
        error_type: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorInfo {
                error_type: error_type.into(),
                message: message.into(),
                param: None,
                code: Some(code.into()),
                request_id: None,
            },
        }
    }
}

#[cfg(feature = "utoipa")]
/// Security scheme and tag groups modifier
struct SecurityAddon;

#[cfg(feature = "utoipa")]
impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "access_token",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::HttpBuilder::new()
                    .scheme(utoipa::openapi::security::HttpAuthScheme::Bearer)
                    .bearer_format("Access token")
                    .description(Some("Access token issued by an administrator"))
                    .build(),
            ),
        );

        // x-tagGroups is read by Scalar for sidebar grouping
        let tag_groups = serde_json::json!([
            {
                "name": "Health & Infrastructure",
                "tags": ["health"]
            },
            {
                "name": "Usage",
                "tags": ["usage", "me", "ingestion"]
            },
            {
                "name": "Administration",
                "tags": ["users", "access_tokens", "instances", "abilities", "event_logs"]
            }
        ]);

        let extensions = openapi.extensions.get_or_insert_with(Default::default);
        extensions.insert("x-tagGroups".to_string(), tag_groups);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_shape() {
        let body = serde_json::to_value(ErrorResponse::new("validation_error", "bad")).unwrap();
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert_eq!(body["error"]["code"], "validation_error");
        assert_eq!(body["error"]["message"], "bad");
        assert!(body["error"]["param"].is_null());
        assert!(body["error"].get("request_id").is_none());
    }

    #[test]
    #[cfg(feature = "utoipa")]
    fn test_openapi_lists_routes() {
        let spec = ApiDoc::build();
        for path in [
            "/api/v1/usage/sum/user",
            "/api/v1/usage/batch/models",
            "/api/v1/me/instances",
            "/api/v1/admin/abilities",
            "/api/external/audit/{instance_id}",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
