use std::sync::Arc;

use crate::{
    db::{DbPool, DbResult},
    models::{EventLog, EventLogFilter, NewEventLog, Page, PageParams},
};

/// Service layer for the administrative event trail
#[derive(Clone)]
pub struct EventLogService {
    db: Arc<DbPool>,
}

impl EventLogService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    pub async fn create(&self, entry: NewEventLog) -> DbResult<EventLog> {
        self.db.event_logs().insert(entry).await
    }

    /// Record an event, logging instead of failing when the write does not
    /// go through. The action being logged has already happened.
    pub async fn record(&self, entry: NewEventLog) {
        let event_type = entry.event_type;
        if let Err(e) = self.db.event_logs().insert(entry).await {
            tracing::warn!(event_type, error = %e, "Failed to write event log");
        }
    }

    /// Newest first
    pub async fn list(&self, filter: &EventLogFilter, params: PageParams) -> DbResult<Page<EventLog>> {
        self.db.event_logs().list(filter, params).await
    }
}
