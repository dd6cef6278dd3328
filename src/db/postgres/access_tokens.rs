use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{
        error::{DbError, DbResult, conflict_on_unique},
        repos::AccessTokenRepo,
    },
    models::AccessToken,
};

const TOKEN_COLUMNS: &str = "id, user_id, name, token_prefix, created_at, last_used_at, revoked_at";

pub struct PostgresAccessTokenRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresAccessTokenRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn row_to_token(row: &PgRow) -> AccessToken {
        AccessToken {
            id: row.get("id"),
            user_id: row.get("user_id"),
            name: row.get("name"),
            token_prefix: row.get("token_prefix"),
            created_at: row.get("created_at"),
            last_used_at: row.get("last_used_at"),
            revoked_at: row.get("revoked_at"),
        }
    }
}

#[async_trait]
impl AccessTokenRepo for PostgresAccessTokenRepo {
    async fn create(
        &self,
        user_id: Uuid,
        name: &str,
        token_hash: &str,
        token_prefix: &str,
    ) -> DbResult<AccessToken> {
        let query = format!(
            r#"
            INSERT INTO access_tokens (id, user_id, name, token_hash, token_prefix, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING {TOKEN_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(name)
            .bind(token_hash)
            .bind(token_prefix)
            .fetch_one(&self.write_pool)
            .await
            .map_err(|e| conflict_on_unique(e, || "Token hash collision".to_string()))?;

        Ok(Self::row_to_token(&row))
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<AccessToken>> {
        let query = format!("SELECT {TOKEN_COLUMNS} FROM access_tokens WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.read_pool)
            .await?;

        Ok(row.as_ref().map(Self::row_to_token))
    }

    async fn get_by_hash(&self, token_hash: &str) -> DbResult<Option<AccessToken>> {
        let query = format!("SELECT {TOKEN_COLUMNS} FROM access_tokens WHERE token_hash = $1");
        let row = sqlx::query(&query)
            .bind(token_hash)
            .fetch_optional(&self.read_pool)
            .await?;

        Ok(row.as_ref().map(Self::row_to_token))
    }

    async fn list_for_user(&self, user_id: Uuid) -> DbResult<Vec<AccessToken>> {
        let query = format!(
            "SELECT {TOKEN_COLUMNS} FROM access_tokens WHERE user_id = $1 ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query)
            .bind(user_id)
            .fetch_all(&self.read_pool)
            .await?;

        Ok(rows.iter().map(Self::row_to_token).collect())
    }

    async fn revoke(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE access_tokens SET revoked_at = $1 WHERE id = $2 AND revoked_at IS NULL",
        )
        .bind(at)
        .bind(id)
        .execute(&self.write_pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE access_tokens SET last_used_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.write_pool)
            .await?;
        Ok(())
    }
}
