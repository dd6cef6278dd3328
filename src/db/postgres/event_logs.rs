use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{error::DbResult, repos::EventLogRepo},
    models::{EventLog, EventLogFilter, NewEventLog, Page, PageParams},
};

pub struct PostgresEventLogRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresEventLogRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn row_to_entry(row: &PgRow) -> EventLog {
        EventLog {
            id: row.get("id"),
            user_id: row.get("user_id"),
            event_type: row.get("event_type"),
            content: row.get("content"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl EventLogRepo for PostgresEventLogRepo {
    async fn insert(&self, entry: NewEventLog) -> DbResult<EventLog> {
        let row = sqlx::query(
            r#"
            INSERT INTO event_logs (id, user_id, event_type, content, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING id, user_id, event_type, content, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(entry.user_id)
        .bind(entry.event_type)
        .bind(&entry.content)
        .fetch_one(&self.write_pool)
        .await?;

        Ok(Self::row_to_entry(&row))
    }

    async fn list(&self, filter: &EventLogFilter, params: PageParams) -> DbResult<Page<EventLog>> {
        // NULL parameters disable their filter.
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, event_type, content, created_at
            FROM event_logs
            WHERE ($1::text IS NULL OR event_type = $1)
              AND ($2::uuid IS NULL OR user_id = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(&filter.event_type)
        .bind(filter.user_id)
        .bind(params.limit())
        .bind(params.offset())
        .fetch_all(&self.read_pool)
        .await?;

        let total: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS count FROM event_logs
            WHERE ($1::text IS NULL OR event_type = $1)
              AND ($2::uuid IS NULL OR user_id = $2)
            "#,
        )
        .bind(&filter.event_type)
        .bind(filter.user_id)
        .fetch_one(&self.read_pool)
        .await?
        .get("count");

        let items = rows.iter().map(Self::row_to_entry).collect();
        Ok(Page::new(items, total, params))
    }
}
