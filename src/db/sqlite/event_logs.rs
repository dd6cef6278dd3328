use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{error::DbResult, repos::EventLogRepo},
    models::{EventLog, EventLogFilter, NewEventLog, Page, PageParams},
};

pub struct SqliteEventLogRepo {
    pool: SqlitePool,
}

impl SqliteEventLogRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_entry(row: &SqliteRow) -> DbResult<EventLog> {
        let user_id: Option<String> = row.get("user_id");
        let content: String = row.get("content");
        Ok(EventLog {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            user_id: user_id.as_deref().map(parse_uuid).transpose()?,
            event_type: row.get("event_type"),
            content: serde_json::from_str(&content)?,
            created_at: row.get("created_at"),
        })
    }

    fn where_clause(filter: &EventLogFilter) -> String {
        format!(
            "{} AND {}",
            if filter.event_type.is_some() { "event_type = ?" } else { "1 = 1" },
            if filter.user_id.is_some() { "user_id = ?" } else { "1 = 1" },
        )
    }
}

#[async_trait]
impl EventLogRepo for SqliteEventLogRepo {
    async fn insert(&self, entry: NewEventLog) -> DbResult<EventLog> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let content = serde_json::to_string(&entry.content)?;

        sqlx::query(
            r#"
            INSERT INTO event_logs (id, user_id, event_type, content, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(entry.user_id.map(|u| u.to_string()))
        .bind(entry.event_type)
        .bind(&content)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(EventLog {
            id,
            user_id: entry.user_id,
            event_type: entry.event_type.to_string(),
            content: entry.content,
            created_at: now,
        })
    }

    async fn list(&self, filter: &EventLogFilter, params: PageParams) -> DbResult<Page<EventLog>> {
        let where_clause = Self::where_clause(filter);

        let list_sql = format!(
            r#"
            SELECT id, user_id, event_type, content, created_at
            FROM event_logs
            WHERE {where_clause}
            ORDER BY created_at DESC, id DESC
            LIMIT ? OFFSET ?
            "#
        );
        let count_sql = format!("SELECT COUNT(*) AS count FROM event_logs WHERE {where_clause}");

        let mut list_query = sqlx::query(&list_sql);
        let mut count_query = sqlx::query(&count_sql);
        if let Some(event_type) = &filter.event_type {
            list_query = list_query.bind(event_type);
            count_query = count_query.bind(event_type);
        }
        if let Some(user_id) = filter.user_id {
            list_query = list_query.bind(user_id.to_string());
            count_query = count_query.bind(user_id.to_string());
        }

        let rows = list_query
            .bind(params.limit())
            .bind(params.offset())
            .fetch_all(&self.pool)
            .await?;
        let total: i64 = count_query.fetch_one(&self.pool).await?.get("count");

        let items = rows
            .iter()
            .map(Self::row_to_entry)
            .collect::<DbResult<Vec<_>>>()?;
        Ok(Page::new(items, total, params))
    }
}
