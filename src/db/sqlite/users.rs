use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use uuid::Uuid;

use super::common::{parse_role, parse_uuid};
use crate::{
    db::{
        error::{DbError, DbResult, conflict_on_unique},
        repos::UserRepo,
    },
    models::{CreateUser, Page, PageParams, UpdateUser, User},
};

const USER_COLUMNS: &str =
    "id, username, name, email, role, is_active, comment, last_login_at, created_at, updated_at";

pub struct SqliteUserRepo {
    pool: SqlitePool,
}

impl SqliteUserRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_user(row: &SqliteRow) -> DbResult<User> {
        Ok(User {
            id: parse_uuid(&row.get::<String, _>("id"))?,
            username: row.get("username"),
            name: row.get("name"),
            email: row.get("email"),
            role: parse_role(&row.get::<String, _>("role"))?,
            is_active: row.get("is_active"),
            comment: row.get("comment"),
            last_login_at: row.get("last_login_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl UserRepo for SqliteUserRepo {
    async fn create(&self, input: CreateUser) -> DbResult<User> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO users (id, username, name, email, role, is_active, comment, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(&input.username)
        .bind(&input.name)
        .bind(&input.email)
        .bind(input.role.as_str())
        .bind(&input.comment)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            conflict_on_unique(e, || {
                format!("User with username '{}' already exists", input.username)
            })
        })?;

        Ok(User {
            id,
            username: input.username,
            name: input.name,
            email: input.email,
            role: input.role,
            is_active: true,
            comment: input.comment,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        let row = sqlx::query(&query)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn get_by_username(&self, username: &str) -> DbResult<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?");
        let row = sqlx::query(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn list(&self, params: PageParams) -> DbResult<Page<User>> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC, id ASC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&query)
            .bind(params.limit())
            .bind(params.offset())
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .iter()
            .map(Self::row_to_user)
            .collect::<DbResult<Vec<_>>>()?;
        let total = self.count().await?;

        Ok(Page::new(items, total, params))
    }

    async fn list_all(&self, active_only: bool) -> DbResult<Vec<User>> {
        let filter = if active_only { "is_active = 1" } else { "1 = 1" };
        let query =
            format!("SELECT {USER_COLUMNS} FROM users WHERE {filter} ORDER BY name ASC, id ASC");
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;

        rows.iter().map(Self::row_to_user).collect()
    }

    async fn count(&self) -> DbResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM users")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("count"))
    }

    async fn update(&self, id: Uuid, input: UpdateUser) -> DbResult<User> {
        let existing = self.get_by_id(id).await?.ok_or(DbError::NotFound)?;
        let now = Utc::now();

        let name = input.name.unwrap_or(existing.name);
        let email = input.email.or(existing.email);
        let role = input.role.unwrap_or(existing.role);
        let is_active = input.is_active.unwrap_or(existing.is_active);
        let comment = input.comment.or(existing.comment);

        let result = sqlx::query(
            r#"
            UPDATE users
            SET name = ?, email = ?, role = ?, is_active = ?, comment = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&name)
        .bind(&email)
        .bind(role.as_str())
        .bind(is_active)
        .bind(&comment)
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }

        self.get_by_id(id).await?.ok_or(DbError::NotFound)
    }

    async fn touch_login(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
            .bind(at)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}
