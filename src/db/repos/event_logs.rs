use async_trait::async_trait;

use crate::{
    db::error::DbResult,
    models::{EventLog, EventLogFilter, NewEventLog, Page, PageParams},
};

#[async_trait]
pub trait EventLogRepo: Send + Sync {
    async fn insert(&self, entry: NewEventLog) -> DbResult<EventLog>;
    /// Newest first.
    async fn list(&self, filter: &EventLogFilter, params: PageParams) -> DbResult<Page<EventLog>>;
}
