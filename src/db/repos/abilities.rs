use async_trait::async_trait;
use uuid::Uuid;

use crate::{db::error::DbResult, models::InstanceAbility};

#[async_trait]
pub trait AbilityRepo: Send + Sync {
    /// Upsert `can_use` for each (user, instance) pair. Returns the stored rows
    /// in the order of `instance_ids`.
    async fn set_can_use(
        &self,
        user_id: Uuid,
        instance_ids: &[Uuid],
        can_use: bool,
    ) -> DbResult<Vec<InstanceAbility>>;
    async fn list_for_user(&self, user_id: Uuid) -> DbResult<Vec<InstanceAbility>>;
    /// False when no ability row exists.
    async fn can_use(&self, user_id: Uuid, instance_id: Uuid) -> DbResult<bool>;
}
