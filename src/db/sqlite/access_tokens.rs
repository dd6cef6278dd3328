use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::parse_uuid;
use crate::{
    db::{
        error::{DbError, DbResult, conflict_on_unique},
        repos::AccessTokenRepo,
    },
    models::AccessToken,
};

const TOKEN_COLUMNS: &str = "id, user_id, name, token_prefix, created_at, last_used_at, revoked_at";

pub struct SqliteAccessTokenRepo {
    pool: SqlitePool,
}

impl SqliteAccessTokenRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_token(row: &SqliteRow) -> DbResult<AccessToken> {
        Ok(AccessToken {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            user_id: parse_uuid(&row.get::<String, _>("user_id"))?,
            name: row.get("name"),
            token_prefix: row.get("token_prefix"),
            created_at: row.get("created_at"),
            last_used_at: row.get("last_used_at"),
            revoked_at: row.get("revoked_at"),
        })
    }
}

#[async_trait]
impl AccessTokenRepo for SqliteAccessTokenRepo {
    async fn create(
        &self,
        user_id: Uuid,
        name: &str,
        token_hash: &str,
        token_prefix: &str,
    ) -> DbResult<AccessToken> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO access_tokens (id, user_id, name, token_hash, token_prefix, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(user_id.to_string())
        .bind(name)
        .bind(token_hash)
        .bind(token_prefix)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| conflict_on_unique(e, || "Token hash collision".to_string()))?;

        Ok(AccessToken {
            id,
            user_id,
            name: name.to_string(),
            token_prefix: token_prefix.to_string(),
            created_at: now,
            last_used_at: None,
            revoked_at: None,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<AccessToken>> {
        let query = format!("SELECT {TOKEN_COLUMNS} FROM access_tokens WHERE id = ?");
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_token).transpose()
    }

    async fn get_by_hash(&self, token_hash: &str) -> DbResult<Option<AccessToken>> {
        let query = format!("SELECT {TOKEN_COLUMNS} FROM access_tokens WHERE token_hash = ?");
        let row = sqlx::query(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_token).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid) -> DbResult<Vec<AccessToken>> {
        let query = format!(
            "SELECT {TOKEN_COLUMNS} FROM access_tokens WHERE user_id = ? ORDER BY created_at DESC"
        );
        let rows = sqlx::query(&query)
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::row_to_token).collect()
    }

    async fn revoke(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE access_tokens SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL",
        )
        .bind(at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn touch(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE access_tokens SET last_used_at = ? WHERE id = ?")
            .bind(at)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
