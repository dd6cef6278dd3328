use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    db::{
        decode::parse_role,
        error::{DbError, DbResult, conflict_on_unique},
        repos::UserRepo,
    },
    models::{CreateUser, Page, PageParams, UpdateUser, User},
};

const USER_COLUMNS: &str =
    "id, username, name, email, role, is_active, comment, last_login_at, created_at, updated_at";

pub struct PostgresUserRepo {
    write_pool: PgPool,
    read_pool: PgPool,
}

impl PostgresUserRepo {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
        }
    }

    fn row_to_user(row: &PgRow) -> DbResult<User> {
        Ok(User {
            id: row.get("id"),
            username: row.get("username"),
            name: row.get("name"),
            email: row.get("email"),
            role: parse_role(row.get("role"))?,
            is_active: row.get("is_active"),
            comment: row.get("comment"),
            last_login_at: row.get("last_login_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl UserRepo for PostgresUserRepo {
    async fn create(&self, input: CreateUser) -> DbResult<User> {
        let query = format!(
            r#"
            INSERT INTO users (id, username, name, email, role, is_active, comment, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, TRUE, $6, NOW(), NOW())
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(Uuid::new_v4())
            .bind(&input.username)
            .bind(&input.name)
            .bind(&input.email)
            .bind(input.role.as_str())
            .bind(&input.comment)
            .fetch_one(&self.write_pool)
            .await
            .map_err(|e| {
                conflict_on_unique(e, || {
                    format!("User with username '{}' already exists", input.username)
                })
            })?;

        Self::row_to_user(&row)
    }

    async fn get_by_id(&self, id: Uuid) -> DbResult<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.read_pool)
            .await?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn get_by_username(&self, username: &str) -> DbResult<Option<User>> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        let row = sqlx::query(&query)
            .bind(username)
            .fetch_optional(&self.read_pool)
            .await?;

        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn list(&self, params: PageParams) -> DbResult<Page<User>> {
        let query = format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC, id ASC LIMIT $1 OFFSET $2"
        );
        let rows = sqlx::query(&query)
            .bind(params.limit())
            .bind(params.offset())
            .fetch_all(&self.read_pool)
            .await?;

        let items = rows
            .iter()
            .map(Self::row_to_user)
            .collect::<DbResult<Vec<_>>>()?;
        let total = self.count().await?;

        Ok(Page::new(items, total, params))
    }

    async fn list_all(&self, active_only: bool) -> DbResult<Vec<User>> {
        let filter = if active_only { "is_active" } else { "TRUE" };
        let query =
            format!("SELECT {USER_COLUMNS} FROM users WHERE {filter} ORDER BY name ASC, id ASC");
        let rows = sqlx::query(&query).fetch_all(&self.read_pool).await?;

        rows.iter().map(Self::row_to_user).collect()
    }

    async fn count(&self) -> DbResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM users")
            .fetch_one(&self.read_pool)
            .await?;
        Ok(row.get("count"))
    }

    async fn update(&self, id: Uuid, input: UpdateUser) -> DbResult<User> {
        let query = format!(
            r#"
            UPDATE users SET
                name = COALESCE($2, name),
                email = COALESCE($3, email),
                role = COALESCE($4, role),
                is_active = COALESCE($5, is_active),
                comment = COALESCE($6, comment),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .bind(&input.name)
            .bind(&input.email)
            .bind(input.role.map(|r| r.as_str()))
            .bind(input.is_active)
            .bind(&input.comment)
            .fetch_optional(&self.write_pool)
            .await?
            .ok_or(DbError::NotFound)?;

        Self::row_to_user(&row)
    }

    async fn touch_login(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<()> {
        let result = sqlx::query("UPDATE users SET last_login_at = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.write_pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }
}
