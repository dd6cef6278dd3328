use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{
        GroupCount, GroupField, InstancePairUsage, ModelPairUsage, NewUsageEvent, Page,
        PageParams, UsageEvent, UsageEventFilter, UsageFilter, UserUsageStats,
    },
};

/// Append-only usage log and the aggregations over it.
///
/// Every aggregation takes the inclusive lower bound `since` (`now - window`)
/// from the caller, so the store never reads the clock.
#[async_trait]
pub trait UsageEventRepo: Send + Sync {
    async fn insert(&self, event: NewUsageEvent) -> DbResult<UsageEvent>;

    /// Newest first.
    async fn list(&self, filter: &UsageEventFilter, params: PageParams)
    -> DbResult<Page<UsageEvent>>;

    /// Count and byte sum per user for events at or after `since`.
    /// Absent filters match every row.
    async fn sum_by_user(
        &self,
        since: DateTime<Utc>,
        filter: &UsageFilter,
    ) -> DbResult<Vec<UserUsageStats>>;

    /// Count events whose model starts with `model_prefix`, grouped by `field`.
    /// Events lacking the field are grouped under `None`.
    async fn count_grouped(
        &self,
        since: DateTime<Utc>,
        instance_id: Option<Uuid>,
        field: GroupField,
        model_prefix: &str,
    ) -> DbResult<Vec<GroupCount>>;

    /// Per (user, instance) aggregates for the given users. Pairs without
    /// events are absent; callers fill them.
    async fn sum_by_user_instance(
        &self,
        since: DateTime<Utc>,
        user_ids: &[Uuid],
    ) -> DbResult<Vec<InstancePairUsage>>;

    /// Per (user, model) aggregates for the given users.
    async fn sum_by_user_model(
        &self,
        since: DateTime<Utc>,
        user_ids: &[Uuid],
    ) -> DbResult<Vec<ModelPairUsage>>;
}
