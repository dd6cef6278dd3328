use async_trait::async_trait;
use uuid::Uuid;

use crate::{db::error::DbResult, models::InstanceToken};

#[async_trait]
pub trait InstanceTokenRepo: Send + Sync {
    /// Store the token for a pair, replacing any previous one.
    async fn upsert(
        &self,
        user_id: Uuid,
        instance_id: Uuid,
        token_hash: &str,
        token_prefix: &str,
    ) -> DbResult<InstanceToken>;
    /// Look a token up by hash, scoped to the instance it was issued for.
    async fn find_by_hash(
        &self,
        instance_id: Uuid,
        token_hash: &str,
    ) -> DbResult<Option<InstanceToken>>;
    async fn list_for_user(&self, user_id: Uuid) -> DbResult<Vec<InstanceToken>>;
    async fn delete_for_user(&self, user_id: Uuid, instance_ids: &[Uuid]) -> DbResult<u64>;
}
