use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{db::error::DbResult, models::AccessToken};

#[async_trait]
pub trait AccessTokenRepo: Send + Sync {
    async fn create(
        &self,
        user_id: Uuid,
        name: &str,
        token_hash: &str,
        token_prefix: &str,
    ) -> DbResult<AccessToken>;
    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<AccessToken>>;
    /// Includes revoked tokens; callers decide.
    async fn get_by_hash(&self, token_hash: &str) -> DbResult<Option<AccessToken>>;
    async fn list_for_user(&self, user_id: Uuid) -> DbResult<Vec<AccessToken>>;
    async fn revoke(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()>;
    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()>;
}
