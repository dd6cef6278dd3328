use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{MAX_IN_PARAMS, parse_uuid, placeholders};
use crate::{
    db::{error::DbResult, repos::InstanceTokenRepo},
    models::InstanceToken,
};

pub struct SqliteInstanceTokenRepo {
    pool: SqlitePool,
}

impl SqliteInstanceTokenRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_token(row: &SqliteRow) -> DbResult<InstanceToken> {
        Ok(InstanceToken {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
            instance_id: parse_uuid(&row.get::<String, _>("instance_id"))?,
            token_prefix: row.get("token_prefix"),
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl InstanceTokenRepo for SqliteInstanceTokenRepo {
    async fn upsert(
        &self,
        user_id: Uuid,
        instance_id: Uuid,
        token_hash: &str,
        token_prefix: &str,
    ) -> DbResult<InstanceToken> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        // Rotation replaces the row, so the previous secret stops working.
        sqlx::query(
            r#"
            INSERT INTO instance_tokens (id, user_id, instance_id, token_hash, token_prefix, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, instance_id)
            DO UPDATE SET id = excluded.id, token_hash = excluded.token_hash,
                          token_prefix = excluded.token_prefix, created_at = excluded.created_at
            "#,
        )
        .bind(id.to_string())
        .bind(user_id.to_string())
        .bind(instance_id.to_string())
        .bind(token_hash)
        .bind(token_prefix)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(InstanceToken {
            id,
            user_id,
            instance_id,
            token_prefix: token_prefix.to_string(),
            created_at: now,
        })
    }

    async fn find_by_hash(
        &self,
        instance_id: Uuid,
        token_hash: &str,
    ) -> DbResult<Option<InstanceToken>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, instance_id, token_prefix, created_at
            FROM instance_tokens
            WHERE token_hash = ? AND instance_id = ?
            "#,
        )
        .bind(token_hash)
        .bind(instance_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_token).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid) -> DbResult<Vec<InstanceToken>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, instance_id, token_prefix, created_at
            FROM instance_tokens
            WHERE user_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_token).collect()
    }

    async fn delete_for_user(&self, user_id: Uuid, instance_ids: &[Uuid]) -> DbResult<u64> {
        let mut deleted = 0;
        for chunk in instance_ids.chunks(MAX_IN_PARAMS) {
            let query = format!(
                "DELETE FROM instance_tokens WHERE user_id = ? AND instance_id IN ({})",
                placeholders(chunk.len())
            );
            let mut q = sqlx::query(&query).bind(user_id.to_string());
            for id in chunk {
                q = q.bind(id.to_string());
            }
            deleted += q.execute(&self.pool).await?.rows_affected();
        }
        Ok(deleted)
    }
}
