use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::validators::validate_ability_instances;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct InstanceAbility {
    pub user_id: Uuid,
    pub instance_id: Uuid,
    pub can_use: bool,
    pub updated_at: DateTime<Utc>,
}

/// Grant or revoke one user's ability to use a set of instances.
#[derive(Debug, Clone, Deserialize, Validate)]
#[cfg_attr(feature = "utoipa", derive(utoipa::ToSchema))]
pub struct UpdateInstanceUseStatus {
    pub user_id: Uuid,
    #[validate(length(min = 1), custom(function = "validate_ability_instances"))]
    pub instance_ids: Vec<Uuid>,
    pub can_use: bool,
}
