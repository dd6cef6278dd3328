use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{error::DbResult, repos::InstanceTokenRepo},
    models::InstanceToken,
};

pub struct PostgresInstanceTokenRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresInstanceTokenRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn row_to_token(row: &PgRow) -> InstanceToken {
        InstanceToken {
            id: row.get("id"),
            user_id: row.get("user_id"),
            instance_id: row.get("instance_id"),
            token_prefix: row.get("token_prefix"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl InstanceTokenRepo for PostgresInstanceTokenRepo {
    async fn upsert(
        &self,
        user_id: Uuid,
        instance_id: Uuid,
        token_hash: &str,
        token_prefix: &str,
    ) -> DbResult<InstanceToken> {
        let row = sqlx::query(
            r#"
            INSERT INTO instance_tokens (id, user_id, instance_id, token_hash, token_prefix, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (user_id, instance_id)
            DO UPDATE SET id = EXCLUDED.id, token_hash = EXCLUDED.token_hash,
                          token_prefix = EXCLUDED.token_prefix, created_at = EXCLUDED.created_at
            RETURNING id, user_id, instance_id, token_prefix, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(instance_id)
        .bind(token_hash)
        .bind(token_prefix)
        .fetch_one(&self.write_pool)
        .await?;

        Ok(Self::row_to_token(&row))
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
            WHERE token_hash = $1 AND instance_id = $2
            "#,
        )
        .bind(token_hash)
        .bind(instance_id)
        .fetch_optional(&self.read_pool)
        .await?;

        Ok(row.as_ref().map(Self::row_to_token))
    }

    async fn list_for_user(&self, user_id: Uuid) -> DbResult<Vec<InstanceToken>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, instance_id, token_prefix, created_at
            FROM instance_tokens
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.read_pool)
        .await?;

        Ok(rows.iter().map(Self::row_to_token).collect())
    }

    async fn delete_for_user(&self, user_id: Uuid, instance_ids: &[Uuid]) -> DbResult<u64> {
        let result = sqlx::query(
            "DELETE FROM instance_tokens WHERE user_id = $1 AND instance_id = ANY($2)",
        )
        .bind(user_id)
        .bind(instance_ids)
        .execute(&self.write_pool)
        .await?;

        Ok(result.rows_affected())
    }
}
