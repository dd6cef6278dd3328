use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{CreateInstance, ServiceInstance, UpdateInstance},
};

#[async_trait]
pub trait InstanceRepo: Send + Sync {
    async fn create(&self, input: CreateInstance) -> DbResult<ServiceInstance>;
    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<ServiceInstance>>;
    /// All instances ordered by name.
    async fn list(&self) -> DbResult<Vec<ServiceInstance>>;
    async fn update(&self, id: Uuid, input: UpdateInstance) -> DbResult<ServiceInstance>;
    /// Abilities and instance tokens cascade; usage history is kept.
    async fn delete(&self, id: Uuid) -> DbResult<()>;
}
