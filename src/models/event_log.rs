use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event type names recorded in the admin audit trail.
pub mod event_types {
    pub const USER_CREATE: &str = "user.create";
    pub const USER_UPDATE: &str = "user.update";
    pub const USER_LOGIN: &str = "user.login";
    pub const INSTANCE_CREATE: &str = "instance.create";
    pub const INSTANCE_UPDATE: &str = "instance.update";
    pub const INSTANCE_DELETE: &str = "instance.delete";
    pub const ABILITY_UPDATE: &str = "ability.update";
    pub const INSTANCE_TOKEN_ISSUE: &str = "instance_token.issue";
    pub const ACCESS_TOKEN_ISSUE: &str = "access_token.issue";
    pub const ACCESS_TOKEN_REVOKE: &str = "access_token.revoke";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct EventLog {
    pub id: Uuid,
    /// Acting user, if any
    pub user_id: Option<Uuid>,
    pub event_type: String,
    pub content: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEventLog {
    pub user_id: Option<Uuid>,
    pub event_type: &'static str,
    pub content: serde_json::Value,
}

impl NewEventLog {
    pub fn new(event_type: &'static str, user_id: Option<Uuid>, content: serde_json::Value) -> Self {
        Self {
            user_id,
            event_type,
            content,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "utoipa", into_params(parameter_in = Query))]
pub struct EventLogFilter {
    pub event_type: Option<String>,
    pub user_id: Option<Uuid>,
}
