use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{decode::parse_service_type, error::DbResult, repos::UsageEventRepo},
    models::{
        GroupCount, GroupField, InstancePairUsage, ModelPairUsage, NewUsageEvent, Page,
        PageParams, UsageEvent, UsageEventFilter, UsageFilter, UserUsageStats, escape_like,
    },
};

pub struct PostgresUsageEventRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresUsageEventRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn row_to_event(row: &PgRow) -> DbResult<UsageEvent> {
        Ok(UsageEvent {
            id: row.get("id"),
            user_id: row.get("user_id"),
            instance_id: row.get("instance_id"),
            service_type: parse_service_type(row.get("service_type"))?,
            timestamp: row.get("timestamp"),
            model: row.get("model"),
            byte_length: row.get("byte_length"),
            text: row.get("text"),
            details: row.get("details"),
        })
    }

    fn group_key_expr(field: GroupField) -> &'static str {
        match field {
            GroupField::Account => "details->>'chatgptAccountId'",
            GroupField::Model => "model",
        }
    }
}

#[async_trait]
impl UsageEventRepo for PostgresUsageEventRepo {
    async fn insert(&self, event: NewUsageEvent) -> DbResult<UsageEvent> {
        let details = serde_json::to_value(&event.details)?;

        let row = sqlx::query(
            r#"
            INSERT INTO usage_events (
                id, user_id, instance_id, service_type, timestamp, model, byte_length, text, details
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id, user_id, instance_id, service_type, timestamp, model, byte_length, text, details
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.user_id)
        .bind(event.instance_id)
        .bind(event.service_type.as_str())
        .bind(event.timestamp)
        .bind(&event.model)
        .bind(event.byte_length)
        .bind(&event.text)
        .bind(&details)
        .fetch_one(&self.write_pool)
        .await?;

        Self::row_to_event(&row)
    }

    async fn list(
        &self,
        filter: &UsageEventFilter,
        params: PageParams,
    ) -> DbResult<Page<UsageEvent>> {
        const WHERE_CLAUSE: &str = r#"
            ($1::uuid IS NULL OR user_id = $1)
            AND ($2::uuid IS NULL OR instance_id = $2)
            AND ($3::timestamptz IS NULL OR timestamp >= $3)
            AND ($4::timestamptz IS NULL OR timestamp <= $4)
        "#;

        let list_sql = format!(
            r#"
            SELECT id, user_id, instance_id, service_type, timestamp, model, byte_length, text, details
            FROM usage_events
            WHERE {WHERE_CLAUSE}
            ORDER BY timestamp DESC, id DESC
            LIMIT $5 OFFSET $6
            "#
        );
        let rows = sqlx::query(&list_sql)
            .bind(filter.user_id)
            .bind(filter.instance_id)
            .bind(filter.timestamp_start)
            .bind(filter.timestamp_end)
            .bind(params.limit())
            .bind(params.offset())
            .fetch_all(&self.read_pool)
            .await?;

        let count_sql = format!("SELECT COUNT(*) AS count FROM usage_events WHERE {WHERE_CLAUSE}");
        let total: i64 = sqlx::query(&count_sql)
            .bind(filter.user_id)
            .bind(filter.instance_id)
            .bind(filter.timestamp_start)
            .bind(filter.timestamp_end)
            .fetch_one(&self.read_pool)
            .await?
            .get("count");

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
        let mut conditions = vec!["timestamp >= $1".to_string()];
        let mut next = 2;
        for (present, column) in [
            (filter.user_id.is_some(), "user_id"),
            (filter.instance_id.is_some(), "instance_id"),
            (filter.service_type.is_some(), "service_type"),
        ] {
            if present {
                conditions.push(format!("{column} = ${next}"));
                next += 1;
            }
        }

        let query = format!(
            r#"
            SELECT user_id, COUNT(*) AS count,
                   COALESCE(SUM(byte_length), 0)::BIGINT AS sum_utf8_length
            FROM usage_events
            WHERE {}
            GROUP BY user_id
            "#,
            conditions.join(" AND ")
        );

        let mut q = sqlx::query(&query).bind(since);
        if let Some(user_id) = filter.user_id {
            q = q.bind(user_id);
        }
        if let Some(instance_id) = filter.instance_id {
            q = q.bind(instance_id);
        }
        if let Some(service_type) = filter.service_type {
            q = q.bind(service_type.as_str());
        }

        let rows = q.fetch_all(&self.read_pool).await?;
        Ok(rows
            .iter()
            .map(|row| UserUsageStats {
                user_id: row.get("user_id"),
                count: row.get("count"),
                sum_utf8_length: row.get("sum_utf8_length"),
            })
            .collect())
    }

    async fn count_grouped(
        &self,
        since: DateTime<Utc>,
        instance_id: Option<Uuid>,
        field: GroupField,
        model_prefix: &str,
    ) -> DbResult<Vec<GroupCount>> {
        let query = format!(
            r#"
            SELECT {} AS group_key, COUNT(*) AS count
            FROM usage_events
            WHERE timestamp >= $1
              AND ($2::uuid IS NULL OR instance_id = $2)
              AND model LIKE $3 ESCAPE '\'
            GROUP BY group_key
            "#,
            Self::group_key_expr(field)
        );

        let rows = sqlx::query(&query)
            .bind(since)
            .bind(instance_id)
            .bind(escape_like(model_prefix))
            .fetch_all(&self.read_pool)
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
        let rows = sqlx::query(
            r#"
            SELECT user_id, instance_id, COUNT(*) AS count,
                   COALESCE(SUM(byte_length), 0)::BIGINT AS sum_utf8_length
            FROM usage_events
            WHERE timestamp >= $1 AND user_id = ANY($2)
            GROUP BY user_id, instance_id
            "#,
        )
        .bind(since)
        .bind(user_ids)
        .fetch_all(&self.read_pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| InstancePairUsage {
                user_id: row.get("user_id"),
                instance_id: row.get("instance_id"),
                count: row.get("count"),
                sum_utf8_length: row.get("sum_utf8_length"),
            })
            .collect())
    }

    async fn sum_by_user_model(
        &self,
        since: DateTime<Utc>,
        user_ids: &[Uuid],
    ) -> DbResult<Vec<ModelPairUsage>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, model, COUNT(*) AS count,
                   COALESCE(SUM(byte_length), 0)::BIGINT AS sum_utf8_length
            FROM usage_events
            WHERE timestamp >= $1 AND user_id = ANY($2)
            GROUP BY user_id, model
            "#,
        )
        .bind(since)
        .bind(user_ids)
        .fetch_all(&self.read_pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ModelPairUsage {
                user_id: row.get("user_id"),
                model: row.get("model"),
                count: row.get("count"),
                sum_utf8_length: row.get("sum_utf8_length"),
            })
            .collect())
    }
}
