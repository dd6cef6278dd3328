use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{MAX_IN_PARAMS, parse_service_type, parse_uuid, placeholders};
use crate::{
    db::{error::DbResult, repos::UsageEventRepo},
    models::{
        GroupCount, GroupField, InstancePairUsage, ModelPairUsage, NewUsageEvent, Page,
        PageParams, UsageEvent, UsageEventFilter, UsageFilter, UserUsageStats,
    },
};

pub struct SqliteUsageEventRepo {
    pool: SqlitePool,
}

impl SqliteUsageEventRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_event(row: &SqliteRow) -> DbResult<UsageEvent> {
        let details: String = row.get("details");
        Ok(UsageEvent {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
            instance_id: parse_uuid(&row.get::<String, _>("instance_id"))?,
            service_type: parse_service_type(&row.get::<String, _>("service_type"))?,
            timestamp: row.get("timestamp"),
            model: row.get("model"),
            byte_length: row.get("byte_length"),
            text: row.get("text"),
            details: serde_json::from_str(&details)?,
        })
    }

    fn group_key_expr(field: GroupField) -> &'static str {
        match field {
            GroupField::Account => "CAST(json_extract(details, '$.chatgptAccountId') AS TEXT)",
            GroupField::Model => "model",
        }
    }

    fn list_where_clause(filter: &UsageEventFilter) -> String {
        [
            filter.user_id.map(|_| "user_id = ?"),
            filter.instance_id.map(|_| "instance_id = ?"),
            filter.timestamp_start.map(|_| "timestamp >= ?"),
            filter.timestamp_end.map(|_| "timestamp <= ?"),
        ]
        .into_iter()
        .map(|c| c.unwrap_or("1 = 1"))
        .collect::<Vec<_>>()
        .join(" AND ")
    }
}

#[async_trait]
impl UsageEventRepo for SqliteUsageEventRepo {
    async fn insert(&self, event: NewUsageEvent) -> DbResult<UsageEvent> {
        let id = Uuid::new_v4();
        let details = serde_json::to_value(&event.details)?;
        let details_json = serde_json::to_string(&details)?;

        sqlx::query(
            r#"
            INSERT INTO usage_events (
                id, user_id, instance_id, service_type, timestamp, model, byte_length, text, details
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(event.user_id.to_string())
        .bind(event.instance_id.to_string())
        .bind(event.service_type.as_str())
        .bind(event.timestamp)
        .bind(&event.model)
        .bind(event.byte_length)
        .bind(&event.text)
        .bind(&details_json)
        .execute(&self.pool)
        .await?;

        Ok(UsageEvent {
            id,
            user_id: event.user_id,
            instance_id: event.instance_id,
            service_type: event.service_type,
            timestamp: event.timestamp,
            model: event.model,
            byte_length: event.byte_length,
            text: event.text,
            details,
        })
    }

    async fn list(
        &self,
        filter: &UsageEventFilter,
        params: PageParams,
    ) -> DbResult<Page<UsageEvent>> {
        let where_clause = Self::list_where_clause(filter);
        let list_sql = format!(
            r#"
            SELECT id, user_id, instance_id, service_type, timestamp, model, byte_length, text, details
            FROM usage_events
            WHERE {where_clause}
            ORDER BY timestamp DESC, id DESC
            LIMIT ? OFFSET ?
            "#
        );
        let count_sql = format!("SELECT COUNT(*) AS count FROM usage_events WHERE {where_clause}");

        let mut list_query = sqlx::query(&list_sql);
        let mut count_query = sqlx::query(&count_sql);
        if let Some(user_id) = filter.user_id {
            list_query = list_query.bind(user_id.to_string());
            count_query = count_query.bind(user_id.to_string());
        }
        if let Some(instance_id) = filter.instance_id {
            list_query = list_query.bind(instance_id.to_string());
            count_query = count_query.bind(instance_id.to_string());
        }
        if let Some(start) = filter.timestamp_start {
            list_query = list_query.bind(start);
            count_query = count_query.bind(start);
        }
        if let Some(end) = filter.timestamp_end {
            list_query = list_query.bind(end);
            count_query = count_query.bind(end);
        }

        let rows = list_query
            .bind(params.limit())
            .bind(params.offset())
            .fetch_all(&self.pool)
            .await?;
        let total: i64 = count_query.fetch_one(&self.pool).await?.get("count");

        let items = rows
            .iter()
            .map(Self::row_to_event)
            .collect::<DbResult<Vec<_>>>()?;
        Ok(Page::new(items, total, params))
    }

    async fn sum_by_user(
        &self,
        since: DateTime<Utc>,
        filter: &UsageFilter,
    ) -> DbResult<Vec<UserUsageStats>> {
        let query = format!(
            r#"
            SELECT user_id, COUNT(*) AS count, COALESCE(SUM(byte_length), 0) AS sum_utf8_length
            FROM usage_events
            WHERE timestamp >= ? AND {} AND {} AND {}
            GROUP BY user_id
            "#,
            if filter.user_id.is_some() { "user_id = ?" } else { "1 = 1" },
            if filter.instance_id.is_some() { "instance_id = ?" } else { "1 = 1" },
            if filter.service_type.is_some() { "service_type = ?" } else { "1 = 1" },
        );

        let mut q = sqlx::query(&query).bind(since);
        if let Some(user_id) = filter.user_id {
            q = q.bind(user_id.to_string());
        }
        if let Some(instance_id) = filter.instance_id {
            q = q.bind(instance_id.to_string());
        }
        if let Some(service_type) = filter.service_type {
            q = q.bind(service_type.as_str());
        }

        let rows = q.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(UserUsageStats {
                    user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
                    count: row.get("count"),
                    sum_utf8_length: row.get("sum_utf8_length"),
                })
            })
            .collect()
    }

    async fn count_grouped(
        &self,
        since: DateTime<Utc>,
        instance_id: Option<Uuid>,
        field: GroupField,
        model_prefix: &str,
    ) -> DbResult<Vec<GroupCount>> {
        // substr keeps the prefix match literal and case-sensitive, unlike LIKE.
        let query = format!(
            r#"
            SELECT {} AS group_key, COUNT(*) AS count
            FROM usage_events
            WHERE timestamp >= ? AND {} AND substr(model, 1, length(?)) = ?
            GROUP BY group_key
            "#,
            Self::group_key_expr(field),
            if instance_id.is_some() { "instance_id = ?" } else { "1 = 1" },
        );

        let mut q = sqlx::query(&query).bind(since);
        if let Some(instance_id) = instance_id {
            q = q.bind(instance_id.to_string());
        }
        let rows = q
            .bind(model_prefix)
            .bind(model_prefix)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| GroupCount {
                key: row.get("group_key"),
                count: row.get("count"),
            })
            .collect())
    }

    async fn sum_by_user_instance(
        &self,
        since: DateTime<Utc>,
        user_ids: &[Uuid],
    ) -> DbResult<Vec<InstancePairUsage>> {
        let mut out = Vec::new();
        for chunk in user_ids.chunks(MAX_IN_PARAMS) {
            let query = format!(
                r#"
                SELECT user_id, instance_id, COUNT(*) AS count,
                       COALESCE(SUM(byte_length), 0) AS sum_utf8_length
                FROM usage_events
                WHERE timestamp >= ? AND user_id IN ({})
                GROUP BY user_id, instance_id
                "#,
                placeholders(chunk.len())
            );
            let mut q = sqlx::query(&query).bind(since);
            for id in chunk {
                q = q.bind(id.to_string());
            }
            for row in q.fetch_all(&self.pool).await? {
                out.push(InstancePairUsage {
                    user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
                    instance_id: parse_uuid(&row.get::<String, _>("instance_id"))?,
                    count: row.get("count"),
                    sum_utf8_length: row.get("sum_utf8_length"),
                });
            }
        }
        Ok(out)
    }

    async fn sum_by_user_model(
        &self,
        since: DateTime<Utc>,
        user_ids: &[Uuid],
    ) -> DbResult<Vec<ModelPairUsage>> {
        let mut out = Vec::new();
        for chunk in user_ids.chunks(MAX_IN_PARAMS) {
            let query = format!(
                r#"
                SELECT user_id, model, COUNT(*) AS count,
                       COALESCE(SUM(byte_length), 0) AS sum_utf8_length
                FROM usage_events
                WHERE timestamp >= ? AND user_id IN ({})
                GROUP BY user_id, model
                "#,
                placeholders(chunk.len())
            );
            let mut q = sqlx::query(&query).bind(since);
            for id in chunk {
                q = q.bind(id.to_string());
            }
            for row in q.fetch_all(&self.pool).await? {
                out.push(ModelPairUsage {
                    user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
                    model: row.get("model"),
                    count: row.get("count"),
                    sum_utf8_length: row.get("sum_utf8_length"),
                });
            }
        }
        Ok(out)
    }
}
