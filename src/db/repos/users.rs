use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    db::error::DbResult,
    models::{CreateUser, Page, PageParams, UpdateUser, User},
};

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create(&self, input: CreateUser) -> DbResult<User>;
    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<User>>;
    async fn get_by_username(&self, username: &str) -> DbResult<Option<User>>;
    /// Oldest first.
    async fn list(&self, params: PageParams) -> DbResult<Page<User>>;
    /// Every user, optionally only active ones, ordered by name.
    async fn list_all(&self, active_only: bool) -> DbResult<Vec<User>>;
    async fn count(&self) -> DbResult<i64>;
    async fn update(&self, id: Uuid, input: UpdateUser) -> DbResult<User>;
    async fn touch_login(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()>;
}
